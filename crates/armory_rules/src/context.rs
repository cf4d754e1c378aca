//! Evaluation inputs handed to the engines for a single call.

use armory_core::{EquipmentStateSnapshot, ItemInstance, OperationRequest, OperationType};

/// What is being evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleContext {
    /// Operation kind.
    pub operation_type: OperationType,
    /// Incoming item, if any.
    pub item: Option<ItemInstance>,
    /// Slot the item goes into.
    pub target_slot: Option<usize>,
    /// Slot the item comes from.
    pub source_slot: Option<usize>,
    /// Items equipped before the operation.
    pub current_items: Vec<ItemInstance>,
    /// Character level, `None` when unknown.
    pub character_level: Option<u32>,
    /// Caller accepts overridable warnings.
    pub allow_override: bool,
}

impl RuleContext {
    /// Creates an empty context for an operation kind.
    #[must_use]
    pub const fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            item: None,
            target_slot: None,
            source_slot: None,
            current_items: Vec::new(),
            character_level: None,
            allow_override: false,
        }
    }

    /// Context for equipping `item` into `slot`.
    #[must_use]
    pub fn equip(item: ItemInstance, slot: usize) -> Self {
        Self::new(OperationType::Equip)
            .with_item(item)
            .with_target_slot(slot)
    }

    /// Context derived from a request. Equipped items are filled in by the caller.
    #[must_use]
    pub fn from_request(request: &OperationRequest) -> Self {
        Self {
            operation_type: request.operation_type,
            item: request.item.clone(),
            target_slot: request.target_slot,
            source_slot: request.source_slot,
            current_items: Vec::new(),
            character_level: None,
            allow_override: request.allow_override,
        }
    }

    /// Sets the incoming item.
    #[must_use]
    pub fn with_item(mut self, item: ItemInstance) -> Self {
        self.item = Some(item);
        self
    }

    /// Sets the target slot.
    #[must_use]
    pub const fn with_target_slot(mut self, slot: usize) -> Self {
        self.target_slot = Some(slot);
        self
    }

    /// Sets the source slot.
    #[must_use]
    pub const fn with_source_slot(mut self, slot: usize) -> Self {
        self.source_slot = Some(slot);
        self
    }

    /// Sets the equipped items.
    #[must_use]
    pub fn with_items(mut self, items: impl IntoIterator<Item = ItemInstance>) -> Self {
        self.current_items = items.into_iter().collect();
        self
    }

    /// Sets the character level.
    #[must_use]
    pub const fn with_level(mut self, level: u32) -> Self {
        self.character_level = Some(level);
        self
    }

    /// Accepts overridable warnings.
    #[must_use]
    pub const fn with_override(mut self) -> Self {
        self.allow_override = true;
        self
    }
}

/// Equipment surroundings for a single placement check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacementContext {
    /// Character level. The level rule is skipped when `None`.
    pub character_level: Option<u32>,
    /// Occupied slots as `(slot index, item)`.
    pub equipped: Vec<(usize, ItemInstance)>,
}

impl PlacementContext {
    /// No level and nothing equipped.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            character_level: None,
            equipped: Vec::new(),
        }
    }

    /// Builds the context from a snapshot.
    #[must_use]
    pub fn from_snapshot(state: &EquipmentStateSnapshot, character_level: Option<u32>) -> Self {
        Self {
            character_level,
            equipped: state
                .slots
                .iter()
                .filter_map(|s| s.item.clone().map(|item| (s.index, item)))
                .collect(),
        }
    }

    /// Sets the character level.
    #[must_use]
    pub const fn with_level(mut self, level: u32) -> Self {
        self.character_level = Some(level);
        self
    }

    /// Adds an equipped item.
    #[must_use]
    pub fn with_equipped(mut self, slot: usize, item: ItemInstance) -> Self {
        self.equipped.push((slot, item));
        self
    }
}
