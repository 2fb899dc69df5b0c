//! Lifetime hooks registered during setup and fired by the host.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::definition::InstanceKind;
use crate::error::{BridgeError, ErrorKind, call_with_error_handling};
use crate::reactive::Value;

/// A host lifetime a hook can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifetime {
    Ready,
    Moved,
    Detached,
    Error,
    Show,
    Hide,
    Resize,
    Load,
    Unload,
    PullDownRefresh,
    ReachBottom,
    PageScroll,
    ShareAppMessage,
    ShareTimeline,
    AddToFavorites,
    TabItemTap,
    SaveExitState,
}

impl Lifetime {
    pub const ALL: [Lifetime; 17] = [
        Lifetime::Ready,
        Lifetime::Moved,
        Lifetime::Detached,
        Lifetime::Error,
        Lifetime::Show,
        Lifetime::Hide,
        Lifetime::Resize,
        Lifetime::Load,
        Lifetime::Unload,
        Lifetime::PullDownRefresh,
        Lifetime::ReachBottom,
        Lifetime::PageScroll,
        Lifetime::ShareAppMessage,
        Lifetime::ShareTimeline,
        Lifetime::AddToFavorites,
        Lifetime::TabItemTap,
        Lifetime::SaveExitState,
    ];

    /// Name of the registration function, e.g. `onReady`.
    pub fn hook_name(&self) -> &'static str {
        match self {
            Self::Ready => "onReady",
            Self::Moved => "onMoved",
            Self::Detached => "onDetached",
            Self::Error => "onError",
            Self::Show => "onShow",
            Self::Hide => "onHide",
            Self::Resize => "onResize",
            Self::Load => "onLoad",
            Self::Unload => "onUnload",
            Self::PullDownRefresh => "onPullDownRefresh",
            Self::ReachBottom => "onReachBottom",
            Self::PageScroll => "onPageScroll",
            Self::ShareAppMessage => "onShareAppMessage",
            Self::ShareTimeline => "onShareTimeline",
            Self::AddToFavorites => "onAddToFavorites",
            Self::TabItemTap => "onTabItemTap",
            Self::SaveExitState => "onSaveExitState",
        }
    }

    /// Only pages fire this lifetime.
    pub fn is_page_only(&self) -> bool {
        matches!(
            self,
            Self::Load
                | Self::Unload
                | Self::PullDownRefresh
                | Self::ReachBottom
                | Self::PageScroll
                | Self::ShareAppMessage
                | Self::ShareTimeline
                | Self::AddToFavorites
                | Self::TabItemTap
                | Self::SaveExitState
        )
    }

    pub fn available_on(&self, kind: InstanceKind) -> bool {
        kind == InstanceKind::Page || !self.is_page_only()
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

/// A registered hook. Receives the host's lifetime arguments.
pub type Hook = Rc<dyn Fn(&[Value]) -> Result<Value, BridgeError>>;

/// Hooks of one instance, per lifetime, in registration order.
#[derive(Default)]
pub(crate) struct HookRegistry {
    hooks: RefCell<IndexMap<Lifetime, Vec<Hook>>>,
}

impl HookRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, lifetime: Lifetime, hook: Hook) {
        self.hooks
            .borrow_mut()
            .entry(lifetime)
            .or_default()
            .push(hook);
    }

    pub(crate) fn count(&self, lifetime: Lifetime) -> usize {
        self.hooks.borrow().get(&lifetime).map_or(0, Vec::len)
    }

    /// Run every hook for `lifetime` in order. Returns the last hook's value;
    /// a failing hook is reported and the rest still run.
    pub(crate) fn run(&self, lifetime: Lifetime, args: &[Value], instance: &str) -> Value {
        // Hooks may register more hooks; never hold the borrow while calling.
        let hooks = self.hooks.borrow().get(&lifetime).cloned().unwrap_or_default();
        let mut last = Value::Undefined;
        for hook in hooks {
            if let Some(value) =
                call_with_error_handling(ErrorKind::LifecycleHook, Some(instance), || hook(args))
            {
                last = value;
            }
        }
        last
    }

    pub(crate) fn clear(&self) {
        self.hooks.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{set_error_handler, take_error_handler};
    use std::cell::Cell;

    fn hook(f: impl Fn(&[Value]) -> Result<Value, BridgeError> + 'static) -> Hook {
        Rc::new(f)
    }

    #[test]
    fn test_runs_in_order_and_returns_last() {
        let registry = HookRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 1..=3 {
            let log = log.clone();
            registry.register(
                Lifetime::ShareAppMessage,
                hook(move |_| {
                    log.borrow_mut().push(n);
                    Ok(Value::from(n))
                }),
            );
        }
        let value = registry.run(Lifetime::ShareAppMessage, &[], "pages/index");
        assert_eq!(value, Value::from(3));
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(registry.count(Lifetime::ShareAppMessage), 3);
        assert_eq!(registry.run(Lifetime::Show, &[], "pages/index"), Value::Undefined);
    }

    #[test]
    fn test_failing_hook_is_reported() {
        let reported = Rc::new(Cell::new(0));
        let sink = reported.clone();
        set_error_handler(move |report| {
            assert_eq!(report.kind, ErrorKind::LifecycleHook);
            sink.set(sink.get() + 1);
        });

        let registry = HookRegistry::new();
        registry.register(Lifetime::Show, hook(|_| Ok(Value::from("first"))));
        registry.register(Lifetime::Show, hook(|_| Err(BridgeError::callback("boom"))));
        let value = registry.run(Lifetime::Show, &[], "c");

        assert_eq!(value, Value::from("first"));
        assert_eq!(reported.get(), 1);
        take_error_handler();
    }

    #[test]
    fn test_page_only_lifetimes() {
        assert!(Lifetime::Load.is_page_only());
        assert!(!Lifetime::Ready.is_page_only());
        assert!(!Lifetime::Unload.available_on(InstanceKind::Component));
        assert!(Lifetime::Unload.available_on(InstanceKind::Page));
        assert!(Lifetime::Show.available_on(InstanceKind::Component));
        assert_eq!(Lifetime::ALL.iter().filter(|l| l.is_page_only()).count(), 10);
        assert_eq!(Lifetime::PullDownRefresh.to_string(), "onPullDownRefresh");
    }
}
