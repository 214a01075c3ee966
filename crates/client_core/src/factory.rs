//! Strategy registries that turn models into view models and view models
//! into template names. Handlers registered later take precedence.

use parking_lot::RwLock;
use shared::protocol::Model;
use tracing::trace;

use crate::error::{Result, SessionError};

type ViewModelHandler<V, C> = Box<dyn Fn(&Model, &C) -> Option<V> + Send + Sync>;
type TemplateHandler<V, B> = Box<dyn Fn(&V, &B) -> Option<String> + Send + Sync>;

pub struct ModelFactory<V, C> {
    handlers: RwLock<Vec<ViewModelHandler<V, C>>>,
}

impl<V, C> Default for ModelFactory<V, C> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<V, C> ModelFactory<V, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, handler: F)
    where
        F: Fn(&Model, &C) -> Option<V> + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    pub fn create_view_model(&self, model: &Model, context: &C) -> Result<V> {
        let handlers = self.handlers.read();
        let view_model = handlers
            .iter()
            .rev()
            .find_map(|handler| handler(model, context));
        match view_model {
            Some(view_model) => {
                trace!(key = %model.key, kind = model.kind.as_str(), "view model created");
                Ok(view_model)
            }
            None => Err(SessionError::NoViewModel(model.key.clone())),
        }
    }
}

pub struct TemplateFactory<V, B> {
    model_handlers: RwLock<Vec<TemplateHandler<V, B>>>,
    field_value_handlers: RwLock<Vec<TemplateHandler<V, B>>>,
}

impl<V, B> Default for TemplateFactory<V, B> {
    fn default() -> Self {
        Self {
            model_handlers: RwLock::new(Vec::new()),
            field_value_handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<V, B> TemplateFactory<V, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model_handler<F>(&self, handler: F)
    where
        F: Fn(&V, &B) -> Option<String> + Send + Sync + 'static,
    {
        self.model_handlers.write().push(Box::new(handler));
    }

    pub fn register_field_value_handler<F>(&self, handler: F)
    where
        F: Fn(&V, &B) -> Option<String> + Send + Sync + 'static,
    {
        self.field_value_handlers.write().push(Box::new(handler));
    }

    pub fn get_template(&self, view_model: &V, binding: &B) -> Result<String> {
        resolve(&self.model_handlers, view_model, binding)
            .ok_or(SessionError::NoTemplate("view model"))
    }

    pub fn get_field_value_template(&self, view_model: &V, binding: &B) -> Result<String> {
        resolve(&self.field_value_handlers, view_model, binding)
            .ok_or(SessionError::NoTemplate("field value"))
    }
}

fn resolve<V, B>(
    handlers: &RwLock<Vec<TemplateHandler<V, B>>>,
    view_model: &V,
    binding: &B,
) -> Option<String> {
    handlers
        .read()
        .iter()
        .rev()
        .find_map(|handler| handler(view_model, binding).filter(|name| !name.is_empty()))
}

#[cfg(test)]
mod tests {
    use shared::domain::ModelKind;

    use super::*;

    #[test]
    fn last_registered_matching_handler_wins() {
        let factory: ModelFactory<String, ()> = ModelFactory::new();
        factory.register(|model, _| Some(format!("generic {}", model.key)));
        factory.register(|model, _| model.is_field().then(|| format!("field {}", model.key)));

        let field = Model::new("F1", ModelKind::Field);
        let button = Model::new("B1", ModelKind::Button);

        assert_eq!(factory.create_view_model(&field, &()).expect("field"), "field F1");
        assert_eq!(factory.create_view_model(&button, &()).expect("button"), "generic B1");
    }

    #[test]
    fn unmatched_model_is_an_error() {
        let factory: ModelFactory<String, ()> = ModelFactory::new();
        factory.register(|model, _| model.is_page().then(|| model.key.clone()));

        let result = factory.create_view_model(&Model::new("F1", ModelKind::Field), &());

        assert!(matches!(result, Err(SessionError::NoViewModel(key)) if key == "F1"));
    }

    #[test]
    fn template_chains_skip_empty_names() {
        let factory: TemplateFactory<&str, u8> = TemplateFactory::new();
        factory.register_model_handler(|_, _| Some("templates/default".to_string()));
        factory.register_model_handler(|view_model, depth| {
            (*view_model == "field" && *depth > 0).then(|| "templates/nested-field".to_string())
        });
        factory.register_model_handler(|_, _| Some(String::new()));

        assert_eq!(factory.get_template(&"field", &1).expect("nested"), "templates/nested-field");
        assert_eq!(factory.get_template(&"field", &0).expect("default"), "templates/default");
        assert!(matches!(
            factory.get_field_value_template(&"field", &0),
            Err(SessionError::NoTemplate("field value"))
        ));

        factory.register_field_value_handler(|_, _| Some("values/plain".to_string()));
        assert_eq!(
            factory.get_field_value_template(&"field", &0).expect("value"),
            "values/plain"
        );
    }
}
