pub mod app;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod factory;
pub mod handler;
pub mod navigation;
pub mod notification;
pub mod queue;
pub mod service;
pub mod view;

pub use app::{AppContext, Application};
pub use bus::{BusMessage, MessageBus, Subscription, Topic};
pub use config::{load_configuration, Configuration};
pub use controller::{ListenerHandle, SessionController, SessionStatus};
pub use error::SessionError;
pub use factory::{ModelFactory, TemplateFactory};
pub use handler::EventHandler;
pub use navigation::{LoggingNavigator, NavigationTarget, Navigator};
pub use notification::NotificationCenter;
pub use queue::EventQueue;
pub use service::{Outcome, SessionService, Submission};
pub use view::{AppModel, BindingContext, SessionView, ViewContext, ViewModel, ViewModelRef};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
