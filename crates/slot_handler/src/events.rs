//! Page events that can change slot visibility.

/// Page-level signals that layout may have changed and slots may have become visible.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageEvent {
    Load,
    Scroll,
    Resize,
    AnimationEnd,
    TransitionEnd,
    /// Any other host signal that element positions may have moved.
    LayoutChanged,
}

impl PageEvent {
    /// The DOM event name this signal corresponds to.
    #[must_use]
    pub const fn dom_name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Scroll => "scroll",
            Self::Resize => "resize",
            Self::AnimationEnd => "animationend",
            Self::TransitionEnd => "transitionend",
            Self::LayoutChanged => "layoutchange",
        }
    }

    /// Map a DOM event name forwarded by the host. Unrelated events yield `None`.
    #[must_use]
    pub fn from_dom_name(name: &str) -> Option<Self> {
        match name {
            "load" => Some(Self::Load),
            "scroll" => Some(Self::Scroll),
            "resize" => Some(Self::Resize),
            "animationend" => Some(Self::AnimationEnd),
            "transitionend" => Some(Self::TransitionEnd),
            "layoutchange" => Some(Self::LayoutChanged),
            _ => None,
        }
    }
}
