use crate::sim::{PageBlock, PageViewport, Scroll, SimulatedAps, SimulatedOpenX, SimulatedRender};
use anyhow::Error;
use core::time::Duration;
use log::{error, info};
use slot_handler::auction::{ApsProvider, select_openx};
use slot_handler::{
    AdSlotElement, AdSlotManager, Collaborators, PageEvent, PageTargeting, Registerable as _,
    SlotHandlerConfig,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::time;

mod sim;

const VIEWPORT: (f64, f64) = (1280.0, 800.0);
const PAGE_TARGETING: &str = r#"{"section":"demo","tags":["rust","ads"]}"#;

pub fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("adslots failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Error> {
    let runtime = Runtime::new()?;
    let config = SlotHandlerConfig::from_env();
    let scroll = Scroll::default();

    let mut providers = vec![select_openx(Arc::new(SimulatedOpenX {
        latency: Duration::from_millis(90),
    }))];
    providers.push(Arc::new(ApsProvider::new(
        Arc::new(SimulatedAps {
            latency: Duration::from_millis(140),
        }),
        config.min_bid_dimension,
    )));
    let manager = AdSlotManager::new(
        runtime.handle(),
        config,
        Collaborators {
            render: Arc::new(SimulatedRender::default()),
            viewport: Arc::new(PageViewport {
                width: VIEWPORT.0,
                height: VIEWPORT.1,
            }),
            providers,
        },
    );

    // First argument is treated as the page address, e.g. `https://example.com/?test=campaign`.
    let page_url = env::args().nth(1);
    let targeting = PageTargeting::from_sources([PAGE_TARGETING], page_url.as_deref())?;

    runtime.block_on(async {
        manager.init_page(&targeting).await;

        let mut elements = page_elements(&scroll);
        for element in &mut elements {
            match element.on_attach(&manager) {
                Ok(outcome) => info!("{}: {outcome:?}", element.attribute("ad-unit").unwrap_or("?")),
                Err(err) => error!("failed to attach placement: {err}"),
            }
        }
        time::sleep(Duration::from_millis(500)).await;

        // Scroll to the bottom of the page, one step per frame.
        for offset in (0..=2600).step_by(100) {
            scroll.set(offset);
            manager.handle_page_event(PageEvent::Scroll);
            time::sleep(Duration::from_millis(16)).await;
        }
        time::sleep(Duration::from_secs(2)).await;

        for element in &elements {
            info!("{}: {:?}", element.attribute("ad-unit").unwrap_or("?"), element.state());
        }
        for element in &mut elements {
            element.on_detach();
        }
        info!("{} slot(s) left after teardown", manager.slot_count());
    });
    Ok(())
}

fn page_elements(scroll: &Scroll) -> Vec<AdSlotElement> {
    vec![
        AdSlotElement::new("ad-top", PageBlock::new(60.0, (728.0, 90.0), scroll))
            .with_attribute("ad-unit", "/1234/demo/top")
            .with_attribute("sizes", "[[728,90],[970,250]]")
            .with_attribute("size-mapping", "[[[1024,0],[[970,250],[728,90]]],[[0,0],[[320,50]]]]"),
        AdSlotElement::new("ad-middle", PageBlock::new(1400.0, (300.0, 250.0), scroll))
            .with_attribute("ad-unit", "/1234/demo/middle")
            .with_attribute("sizes", "[[300,250],\"fluid\"]")
            .with_attribute("preload", "200")
            .with_attribute("collapse-empty", ""),
        AdSlotElement::new("ad-bottom", PageBlock::new(3000.0, (300.0, 600.0), scroll))
            .with_attribute("ad-unit", "/1234/demo/bottom")
            .with_attribute("sizes", "[[300,600],[1,1]]")
            .with_attribute("openx-ignore", ""),
        AdSlotElement::new("ad-interstitial", PageBlock::new(0.0, (0.0, 0.0), scroll))
            .with_attribute("ad-unit", "/1234/demo/interstitial")
            .with_attribute("sizes", "[]")
            .with_attribute("size-mapping", "[[[0,0],[[1,1]]]]")
            .with_attribute("out-of-page", ""),
        AdSlotElement::new("ad-desktop-only", PageBlock::new(200.0, (160.0, 600.0), scroll))
            .with_attribute("ad-unit", "/1234/demo/skyscraper")
            .with_attribute("sizes", "[[160,600]]")
            .with_attribute("min-x-resolution", "1440"),
    ]
}
