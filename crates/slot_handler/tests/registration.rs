mod common;

#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use core::time::Duration;
    use super::common::{Call, FakeElement, TestPage, settle, slot};
    use slot_handler::{AdSize, ConfigError, SlotConfig};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn visible_slot_is_defined_displayed_and_refreshed_once() -> Result<()> {
        let page = TestPage::new();
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        settle(200).await;

        let render_handle = page.render_handle(handle.id()).ok_or_else(|| anyhow!("slot was never defined"))?;
        assert_eq!(
            page.log.calls(),
            vec![
                Call::DefineSlot {
                    path: String::from("/1234/home/top"),
                    container: String::from("ad-top"),
                },
                Call::DefineSizeMapping(render_handle),
                Call::AddService(render_handle),
                Call::Display(String::from("ad-top")),
                Call::Refresh {
                    handles: vec![render_handle],
                    change_correlator: false,
                },
            ]
        );
        assert_eq!(handle.is_pending(), Some(false));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pending_flag_tracks_refresh_requests() -> Result<()> {
        let page = TestPage::new();
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        assert_eq!(handle.is_pending(), Some(true));

        settle(200).await;
        assert_eq!(handle.is_pending(), Some(false));

        handle.refresh();
        assert_eq!(handle.is_pending(), Some(true));
        settle(200).await;
        assert_eq!(handle.is_pending(), Some(false));
        assert_eq!(page.log.refreshes().len(), 2);
        assert_eq!(page.log.count(|call| matches!(call, Call::DefineSlot { .. })), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slot_destroyed_before_the_service_is_ready_is_never_defined() -> Result<()> {
        let page = TestPage::new();
        page.render.set_ready(false);
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        settle(20).await;
        handle.destroy();
        page.render.set_ready(true);
        settle(200).await;

        assert!(page.log.calls().is_empty());
        assert_eq!(page.manager.slot_count(), 0);
        assert!(!handle.is_live());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_twice_releases_the_slot_once() -> Result<()> {
        let page = TestPage::new();
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        settle(200).await;
        let render_handle = page.render_handle(handle.id());

        handle.destroy();
        handle.destroy();
        handle.refresh();
        settle(200).await;

        assert_eq!(
            page.log.count(|call| matches!(call, Call::Destroy(_))),
            1,
            "second destroy must be a no-op"
        );
        assert!(
            page.log
                .calls()
                .contains(&Call::Destroy(render_handle.into_iter().collect()))
        );
        assert_eq!(page.log.refreshes().len(), 1);
        assert_eq!(handle.is_pending(), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_configuration_fails_fast() -> Result<()> {
        let page = TestPage::new();
        let element = FakeElement::visible();

        let malformed = SlotConfig::new("/1234/home/top", "ad-top", Arc::<FakeElement>::clone(&element)).with_raw_sizes(Some("[[300,"), None);
        assert!(matches!(malformed, Err(ConfigError::InvalidSizes(_))));

        let no_sizes = page
            .manager
            .register(SlotConfig::new("/1234/home/top", "ad-top", Arc::<FakeElement>::clone(&element)));
        assert!(matches!(no_sizes, Err(ConfigError::MissingSizes)));

        let fluid = page
            .manager
            .register(slot("ad-top", Arc::clone(&element)).with_sizes(vec![AdSize::Fluid]))?;
        assert_eq!(fluid.is_pending(), Some(true), "fluid sizes are valid");
        let mut unnamed = slot("ad-side", element);
        unnamed.ad_unit_path = String::from("  ");
        assert!(matches!(page.manager.register(unnamed), Err(ConfigError::MissingAdUnit)));

        settle(200).await;
        assert_eq!(page.manager.slot_count(), 1);
        assert_eq!(page.log.count(|call| matches!(call, Call::DefineSlot { .. })), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_page_slot_skips_size_mapping_and_honours_collapse() -> Result<()> {
        let page = TestPage::new();
        let mut config = slot("ad-interstitial", FakeElement::below_fold());
        config.out_of_page = true;
        config.collapse_empty = true;
        let handle = page.manager.register(config)?;
        settle(200).await;

        let render_handle = page.render_handle(handle.id()).ok_or_else(|| anyhow!("slot was never defined"))?;
        let calls = page.log.calls();
        assert!(matches!(calls.first(), Some(Call::DefineOutOfPageSlot { .. })));
        assert!(!calls.iter().any(|call| matches!(call, Call::DefineSizeMapping(_))));
        assert!(calls.contains(&Call::SetCollapseEmptyDiv(render_handle)));
        assert_eq!(page.log.refreshes(), vec![vec![render_handle]]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_definition_reports_the_slot_empty() -> Result<()> {
        let page = TestPage::new();
        page.render.set_ready(false);
        page.render.fail_defines();
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        let empties = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&empties);
        handle.on_empty(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        page.render.set_ready(true);
        settle(200).await;

        assert_eq!(empties.load(Ordering::SeqCst), 1);
        assert!(page.log.refreshes().is_empty());
        assert_eq!(handle.is_pending(), Some(true));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn half_configured_slot_is_released_and_never_refreshed() -> Result<()> {
        let page = TestPage::new();
        page.render.fail_displays();
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        let empties = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&empties);
        handle.on_empty(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle(200).await;

        let calls = page.log.calls();
        let defined = calls
            .iter()
            .find_map(|call| match call {
                Call::AddService(render_handle) => Some(*render_handle),
                _ => None,
            })
            .ok_or_else(|| anyhow!("slot was never configured"))?;
        assert_eq!(calls.last(), Some(&Call::Destroy(vec![defined])));
        assert_eq!(page.log.count(|call| matches!(call, Call::Destroy(_))), 1);
        assert!(page.log.refreshes().is_empty());
        assert_eq!(page.render_handle(handle.id()), None);
        assert_eq!(empties.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn destroy_waits_for_a_definition_in_progress() -> Result<()> {
        let page = TestPage::new();
        page.render.delay_defines(Duration::from_millis(100));
        let handle = page.manager.register(slot("ad-top", FakeElement::visible()))?;
        time::timeout(Duration::from_secs(5), async {
            while page.log.count(|call| matches!(call, Call::DefineSlot { .. })) == 0 {
                settle(1).await;
            }
        })
        .await?;

        handle.destroy();
        let calls = page.log.calls();
        let displayed = calls
            .iter()
            .position(|call| matches!(call, Call::Display(_)))
            .ok_or_else(|| anyhow!("definition was cut short"))?;
        let destroyed = calls
            .iter()
            .position(|call| matches!(call, Call::Destroy(handles) if handles.len() == 1))
            .ok_or_else(|| anyhow!("destroy returned before releasing the defined slot"))?;
        assert!(displayed < destroyed);

        settle(200).await;
        assert_eq!(page.log.count(|call| matches!(call, Call::Destroy(_))), 1);
        assert!(page.log.refreshes().is_empty());
        assert_eq!(page.manager.slot_count(), 0);
        Ok(())
    }
}
