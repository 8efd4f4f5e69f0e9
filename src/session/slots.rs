//! Dialogue slots that need validation before a record can be saved.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotName {
    Phone,
    Address,
}

impl SlotName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Address => "address",
        }
    }

    /// Wording used inside spoken prompts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Phone => "phone number",
            Self::Address => "address",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotStatus {
    Unvalidated,
    /// A validator call is in flight for this tool call id.
    Pending { call_id: String },
    Validated,
    /// Retry budget spent; the caller's value is taken as dictated.
    AcceptedUnverified,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub name: SlotName,
    pub required: bool,
    pub status: SlotStatus,
    /// Failed validation attempts since the last success.
    pub retries: u32,
    /// Normalized value from the last successful validation.
    pub value: Option<Value>,
}

impl Slot {
    pub fn new(name: SlotName, required: bool) -> Self {
        Self {
            name,
            required,
            status: SlotStatus::Unvalidated,
            retries: 0,
            value: None,
        }
    }

    pub fn is_validated(&self) -> bool {
        self.status == SlotStatus::Validated
    }

    /// Validated, or accepted after the retry budget ran out.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, SlotStatus::Validated | SlotStatus::AcceptedUnverified)
    }

    pub fn pending_call(&self) -> Option<&str> {
        match &self.status {
            SlotStatus::Pending { call_id } => Some(call_id),
            _ => None,
        }
    }

    /// Reopen the slot. The retry count is kept.
    pub fn invalidate(&mut self) {
        self.status = SlotStatus::Unvalidated;
        self.value = None;
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub phone: Slot,
    pub address: Slot,
    /// A correction was heard and the slot has not been re-validated yet.
    pub correction_pending: bool,
    /// A confirmation summary was read out; the next save is the caller's go-ahead.
    pub awaiting_confirmation: bool,
    /// Order number once the record is saved.
    pub saved_order: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phone: Slot::new(SlotName::Phone, true),
            address: Slot::new(SlotName::Address, true),
            correction_pending: false,
            awaiting_confirmation: false,
            saved_order: None,
        }
    }
}

impl SessionState {
    pub fn slot(&self, name: SlotName) -> &Slot {
        match name {
            SlotName::Phone => &self.phone,
            SlotName::Address => &self.address,
        }
    }

    pub fn slot_mut(&mut self, name: SlotName) -> &mut Slot {
        match name {
            SlotName::Phone => &mut self.phone,
            SlotName::Address => &mut self.address,
        }
    }

    /// Required slots not yet settled, in the order the dialogue asks for
    /// them: phone, then address.
    pub fn open_required(&self) -> Vec<SlotName> {
        [&self.phone, &self.address]
            .into_iter()
            .filter(|s| s.required && !s.is_settled())
            .map(|s| s.name)
            .collect()
    }

    /// Slot a caller correction most plausibly refers to: an unvalidated
    /// address, else an unvalidated phone, else the address.
    pub fn correction_target(&self) -> SlotName {
        if !self.address.is_validated() {
            SlotName::Address
        } else if !self.phone.is_validated() {
            SlotName::Phone
        } else {
            SlotName::Address
        }
    }
}
