//! Resolved resource paths, as handed over by the path parser.

use serde::{Deserialize, Serialize};

use crate::model::{EntityType, Id, Property};

/// One segment of a resolved path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PathElement {
    /// An entity set, or a single entity when `id` is present.
    #[serde(rename_all = "camelCase")]
    Entity {
        entity_type: EntityType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Id>,
    },
    /// A property of the preceding entity.
    Property { property: Property },
    /// A key inside a JSON document property; projection is unaffected.
    CustomProperty { name: String },
}

/// Ordered navigation through the entity graph, root first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePath {
    pub elements: Vec<PathElement>,
}

impl ResourcePath {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity set segment.
    pub fn set(mut self, entity_type: EntityType) -> Self {
        self.elements.push(PathElement::Entity {
            entity_type,
            id: None,
        });
        self
    }

    /// Append a single-entity segment.
    pub fn entity(mut self, entity_type: EntityType, id: impl Into<Id>) -> Self {
        self.elements.push(PathElement::Entity {
            entity_type,
            id: Some(id.into()),
        });
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.elements.push(PathElement::Property { property });
        self
    }

    pub fn custom_property(mut self, name: impl Into<String>) -> Self {
        self.elements.push(PathElement::CustomProperty { name: name.into() });
        self
    }
}
