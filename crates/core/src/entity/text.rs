//! The service's rich-text struct, and the content sum type mutating
//! operations accept.

use crate::descriptor::{EntityDescriptor, FieldMapping, MappingTable};
use crate::marshal::EntityState;
use crate::service::Channel;
use remora_wire::WireStruct;

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "Text",
    channel: Channel::TestManagement,
    id_field: None,
    fields: &[
        ("content_type", FieldMapping::Scalar { remote: "type" }),
        ("content", FieldMapping::Scalar { remote: "content" }),
    ],
};

/// A block of rich text: a content type tag plus the content itself.
#[derive(Debug, Clone)]
pub struct Text {
    table: MappingTable,
    state: EntityState,
}

impl Text {
    pub fn plain(content: &str) -> Text {
        Text::with_type("text/plain", content)
    }

    pub fn html(content: &str) -> Text {
        Text::with_type("text/html", content)
    }

    pub fn with_type(content_type: &str, content: &str) -> Text {
        Text::from_struct(
            WireStruct::new(DESCRIPTOR.type_id)
                .with_field("type", content_type)
                .with_field("content", content),
        )
    }

    pub fn from_struct(body: WireStruct) -> Text {
        Text {
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn content(&self) -> Option<String> {
        self.state.str_field(&self.table, "content")
    }

    pub fn content_type(&self) -> Option<String> {
        self.state.str_field(&self.table, "content_type")
    }

    pub fn into_wire(self) -> WireStruct {
        self.state.into_body()
    }
}

/// Content accepted by text-valued operations: a plain string, a [`Text`]
/// entity, or a pre-built wire struct. Explicit constructors — the variant
/// is never inferred from the value's shape.
#[derive(Debug, Clone)]
pub enum TextContent {
    Plain(String),
    Entity(Text),
    Wire(WireStruct),
}

impl TextContent {
    pub(crate) fn into_wire(self) -> WireStruct {
        match self {
            TextContent::Plain(content) => Text::plain(&content).into_wire(),
            TextContent::Entity(text) => text.into_wire(),
            TextContent::Wire(body) => body,
        }
    }
}

impl From<&str> for TextContent {
    fn from(content: &str) -> Self {
        TextContent::Plain(content.to_string())
    }
}

impl From<String> for TextContent {
    fn from(content: String) -> Self {
        TextContent::Plain(content)
    }
}

impl From<Text> for TextContent {
    fn from(text: Text) -> Self {
        TextContent::Entity(text)
    }
}

impl From<WireStruct> for TextContent {
    fn from(body: WireStruct) -> Self {
        TextContent::Wire(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_round_trip() {
        let text = Text::plain("everything passed");
        assert_eq!(text.content_type().as_deref(), Some("text/plain"));
        assert_eq!(text.content().as_deref(), Some("everything passed"));
        let wire = text.into_wire();
        let back = Text::from_struct(wire);
        assert_eq!(back.content().as_deref(), Some("everything passed"));
    }

    #[test]
    fn content_variants_produce_text_structs() {
        let from_str = TextContent::from("note").into_wire();
        assert_eq!(from_str.field("content").unwrap().as_str(), Some("note"));
        let from_entity = TextContent::from(Text::html("<b>hi</b>")).into_wire();
        assert_eq!(from_entity.field("type").unwrap().as_str(), Some("text/html"));
    }
}
