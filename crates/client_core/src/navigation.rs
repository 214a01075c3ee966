use tracing::info;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTarget {
    SameContext,
    NewContext,
}

impl NavigationTarget {
    pub fn from_new_tab(new_tab: bool) -> Self {
        if new_tab {
            NavigationTarget::NewContext
        } else {
            NavigationTarget::SameContext
        }
    }
}

/// Opens locations handed out by the server, e.g. after a project switch.
pub trait Navigator: Send + Sync {
    fn open(&self, location: &Url, target: NavigationTarget);
}

/// Navigator for hosts without a browsing context; only records the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn open(&self, location: &Url, target: NavigationTarget) {
        info!(%location, ?target, "navigation requested");
    }
}
