//! Push-relay message model

use crate::domain::types::EventKind;
use serde::Serialize;
use serde_json::{Map, Value};

/// Placeholder substituted with the region identifier in templates
pub const REGION_PLACEHOLDER: &str = "{region}";

/// Body of a push-relay `send` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Builds relay messages from a region and a destination token
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub sound: String,
    pub title: String,
    pub body: String,
    /// Extra static fields merged into `data`
    pub data: Map<String, Value>,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self {
            sound: "default".to_string(),
            title: "Estas cerca de {region}".to_string(),
            body: "Nos alegramos que te interese visitar {region}".to_string(),
            data: Map::new(),
        }
    }
}

impl MessageTemplate {
    pub fn render(&self, token: &str, region: &str, kind: EventKind) -> PushMessage {
        let mut data = self.data.clone();
        data.insert("region".to_string(), Value::String(region.to_string()));
        data.insert("kind".to_string(), Value::String(kind.as_str().to_string()));

        PushMessage {
            to: token.to_string(),
            sound: self.sound.clone(),
            title: self.title.replace(REGION_PLACEHOLDER, region),
            body: self.body.replace(REGION_PLACEHOLDER, region),
            data: Value::Object(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_template() {
        let msg = MessageTemplate::default().render("tok-1", "Iglesia GERIZIM", EventKind::Enter);

        assert_eq!(msg.to, "tok-1");
        assert_eq!(msg.sound, "default");
        assert_eq!(msg.title, "Estas cerca de Iglesia GERIZIM");
        assert_eq!(msg.body, "Nos alegramos que te interese visitar Iglesia GERIZIM");
        assert_eq!(msg.data["region"], "Iglesia GERIZIM");
        assert_eq!(msg.data["kind"], "enter");
    }

    #[test]
    fn test_render_keeps_static_data() {
        let mut template = MessageTemplate::default();
        template.data.insert("campaign".to_string(), Value::from("spring"));
        let msg = template.render("tok", "A", EventKind::Exit);
        assert_eq!(msg.data["campaign"], "spring");
        assert_eq!(msg.data["kind"], "exit");
    }

    #[test]
    fn test_serialized_shape() {
        let msg = MessageTemplate::default().render("tok", "A", EventKind::Enter);
        let json = serde_json::to_value(&msg).unwrap();

        for key in ["to", "sound", "title", "body", "data"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
