//! Slot-filling dialogue control for one call.
//!
//! The orchestrator is synchronous and owns no I/O. The call actor feeds it
//! tool calls, validator results and transcripts; it answers with the
//! [`ClientEvent`]s to send, always a tool result before any continuation.
//!
//! ## Validation per slot
//!
//! ```text
//! Unvalidated ─▸ Pending ─▸ Validated
//!      ▲            │
//!      └── failed ──┘  (retries += 1; at the cap ─▸ AcceptedUnverified)
//! ```
//!
//! A correction heard from the caller reopens a slot without touching its
//! retry count. A save request is held back with a read-back summary while
//! any required slot is unsettled; the next save after that summary is
//! taken as the caller's confirmation.

use serde_json::{json, Value};

use super::correction::PhraseMatcher;
use super::record::ClientRecord;
use super::slots::{SessionState, SlotName, SlotStatus};
use crate::config::{DialogueConfig, PromptConfig};
use crate::realtime::ClientEvent;
use crate::retry::RetryPolicy;
use crate::validators::ValidationOutcome;

/// What to do with a validation request.
#[derive(Debug, PartialEq)]
pub enum ValidationStart {
    /// Run the validator, then call [`Orchestrator::complete_validation`].
    Dispatch,
    /// Answered without a validator.
    Immediate(Vec<ClientEvent>),
}

/// What to do with a save request.
#[derive(Debug, PartialEq)]
pub enum SaveDecision {
    /// Commit the record, then call [`Orchestrator::complete_save`].
    Persist(Box<ClientRecord>),
    /// Held back pending confirmation.
    Deferred(Vec<ClientEvent>),
    /// Arguments could not be read.
    Rejected(Vec<ClientEvent>),
}

/// A caller correction that reopened a slot.
#[derive(Debug, PartialEq)]
pub struct Correction {
    pub slot: SlotName,
    pub events: Vec<ClientEvent>,
}

pub struct Orchestrator {
    call_id: String,
    state: SessionState,
    policy: RetryPolicy,
    corrections: PhraseMatcher,
    skip_guard: PhraseMatcher,
    prompts: PromptConfig,
    caller_number: Option<String>,
}

fn fill(template: &str, slot: Option<SlotName>, summary: &str, order_number: &str) -> String {
    template
        .replace("{slot}", slot.map(SlotName::label).unwrap_or(""))
        .replace("{summary}", summary)
        .replace("{order_number}", order_number)
}

fn output(call_id: &str, value: Value) -> ClientEvent {
    ClientEvent::FunctionOutput {
        call_id: call_id.to_string(),
        output: value,
    }
}

impl Orchestrator {
    pub fn new(
        call_id: &str,
        config: &DialogueConfig,
        caller_number: Option<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            call_id: call_id.to_string(),
            state: SessionState::default(),
            policy: config.validation_policy(),
            corrections: PhraseMatcher::new(&config.correction_phrases)?,
            skip_guard: PhraseMatcher::new(&config.skip_phrases)?,
            prompts: config.prompts.clone(),
            caller_number: caller_number.filter(|n| !n.trim().is_empty()),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    // ── Validation ────────────────────────────────────────────────

    pub fn begin_validation(&mut self, name: SlotName, tool_call_id: &str) -> ValidationStart {
        let policy = self.policy;
        let slot = self.state.slot_mut(name);

        if policy.is_exhausted(slot.retries) {
            slot.status = SlotStatus::AcceptedUnverified;
            tracing::info!(
                call_id = %self.call_id,
                slot = name.as_str(),
                retries = slot.retries,
                "Retry budget already spent, accepting value as dictated"
            );
            return ValidationStart::Immediate(vec![
                output(tool_call_id, json!({ "ok": true, "skipped": true })),
                ClientEvent::respond(),
            ]);
        }

        slot.status = SlotStatus::Pending {
            call_id: tool_call_id.to_string(),
        };
        self.state.correction_pending = false;
        ValidationStart::Dispatch
    }

    pub fn complete_validation(
        &mut self,
        name: SlotName,
        tool_call_id: &str,
        outcome: ValidationOutcome,
    ) -> Vec<ClientEvent> {
        let policy = self.policy;
        let slot = self.state.slot_mut(name);

        if slot.pending_call() != Some(tool_call_id) {
            // Reopened by a correction while the validator ran; answer the
            // model but leave the slot alone.
            tracing::info!(
                call_id = %self.call_id,
                slot = name.as_str(),
                tool_call_id,
                "Stale validation result"
            );
            return vec![output(tool_call_id, outcome.to_output()), ClientEvent::respond()];
        }

        match outcome {
            ValidationOutcome::Valid { normalized } => {
                slot.status = SlotStatus::Validated;
                slot.retries = 0;
                slot.value = Some(normalized.clone());
                tracing::info!(call_id = %self.call_id, slot = name.as_str(), "Slot validated");
                vec![
                    output(tool_call_id, json!({ "ok": true, "normalized": normalized })),
                    ClientEvent::respond(),
                ]
            }
            ValidationOutcome::Invalid { reason } => {
                slot.retries += 1;
                if policy.is_exhausted(slot.retries) {
                    slot.status = SlotStatus::AcceptedUnverified;
                    tracing::warn!(
                        call_id = %self.call_id,
                        slot = name.as_str(),
                        retries = slot.retries,
                        reason = %reason,
                        "Validation budget exhausted, accepting unverified"
                    );
                    let warning = fill(&self.prompts.accepted_unverified, Some(name), "", "");
                    vec![
                        output(
                            tool_call_id,
                            json!({ "ok": false, "reason": reason, "accepted_unverified": true }),
                        ),
                        ClientEvent::respond_with(warning),
                    ]
                } else {
                    slot.status = SlotStatus::Unvalidated;
                    tracing::info!(
                        call_id = %self.call_id,
                        slot = name.as_str(),
                        retries = slot.retries,
                        reason = %reason,
                        "Validation failed"
                    );
                    vec![
                        output(tool_call_id, json!({ "ok": false, "reason": reason })),
                        ClientEvent::respond(),
                    ]
                }
            }
        }
    }

    // ── Transcripts ───────────────────────────────────────────────

    /// Scan a completed caller turn for a correction.
    pub fn on_caller_transcript(&mut self, text: &str) -> Option<Correction> {
        let pattern = self.corrections.first_match(text)?;
        let target = self.state.correction_target();

        self.state.slot_mut(target).invalidate();
        self.state.correction_pending = true;
        self.state.awaiting_confirmation = false;

        tracing::info!(
            call_id = %self.call_id,
            slot = target.as_str(),
            pattern,
            text = %text,
            "Caller correction detected"
        );
        Some(Correction {
            slot: target,
            events: vec![
                ClientEvent::ResponseCancel,
                ClientEvent::respond_with(fill(&self.prompts.correction, Some(target), "", "")),
            ],
        })
    }

    /// Stop the assistant from moving past a slot that is still open.
    pub fn on_assistant_transcript(&mut self, text: &str) -> Option<Vec<ClientEvent>> {
        if !self.skip_guard.is_match(text) {
            return None;
        }
        let open = *self.state.open_required().first()?;
        tracing::info!(
            call_id = %self.call_id,
            slot = open.as_str(),
            "Assistant moved on with an open slot"
        );
        Some(vec![
            ClientEvent::ResponseCancel,
            ClientEvent::respond_with(fill(&self.prompts.skip_guard, Some(open), "", "")),
        ])
    }

    // ── Save ──────────────────────────────────────────────────────

    pub fn on_save_request(&mut self, tool_call_id: &str, arguments: &str) -> SaveDecision {
        let mut record = match ClientRecord::from_arguments(arguments) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(call_id = %self.call_id, error = %e, "Unreadable save arguments");
                return SaveDecision::Rejected(vec![
                    output(tool_call_id, json!({ "ok": false, "error": "invalid_arguments" })),
                    ClientEvent::respond(),
                ]);
            }
        };
        record.phone2 = self.caller_number.clone();
        self.apply_validated(&mut record);

        let open = self.state.open_required();
        if !open.is_empty() {
            if !self.state.awaiting_confirmation {
                self.state.awaiting_confirmation = true;
                let summary = record.summary();
                tracing::info!(
                    call_id = %self.call_id,
                    open = ?open.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                    "Save held for confirmation"
                );
                return SaveDecision::Deferred(vec![
                    output(
                        tool_call_id,
                        json!({
                            "ok": false,
                            "reason": "confirmation_required",
                            "unvalidated": open.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                            "summary": summary,
                        }),
                    ),
                    ClientEvent::respond_with(fill(&self.prompts.confirm_summary, None, &summary, "")),
                ]);
            }
            // Summary was read back and the model is saving again: the
            // caller confirmed the values as dictated.
            for name in open {
                self.state.slot_mut(name).status = SlotStatus::AcceptedUnverified;
            }
        }

        self.state.awaiting_confirmation = false;
        SaveDecision::Persist(Box::new(record))
    }

    /// Replace dictated values with what the validators normalized.
    fn apply_validated(&self, record: &mut ClientRecord) {
        let phone = &self.state.phone;
        if let (true, Some(Value::String(normalized))) = (phone.is_validated(), &phone.value) {
            record.phone = normalized.clone();
        }

        let address = &self.state.address;
        let Some(found) = address.value.as_ref().filter(|_| address.is_validated()) else {
            return;
        };
        let text = |key: &str| {
            found
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(city) = text("city") {
            record.address.city = city;
        }
        if let Some(street) = text("street") {
            record.address.street = street;
        }
        if let Some(house_number) = text("house_number") {
            record.address.house_number = house_number;
        }
        record.address.latitude = found.get("latitude").and_then(Value::as_f64).or(record.address.latitude);
        record.address.longitude = found.get("longitude").and_then(Value::as_f64).or(record.address.longitude);
    }

    pub fn complete_save(
        &mut self,
        tool_call_id: &str,
        result: Result<String, String>,
    ) -> Vec<ClientEvent> {
        match result {
            Ok(order_number) => {
                self.state.saved_order = Some(order_number.clone());
                vec![
                    output(tool_call_id, json!({ "ok": true, "order_number": order_number })),
                    ClientEvent::respond_with(fill(&self.prompts.saved, None, "", &order_number)),
                ]
            }
            Err(error) => {
                tracing::error!(call_id = %self.call_id, error = %error, "Save failed");
                vec![
                    output(tool_call_id, json!({ "ok": false, "error": "save_failed" })),
                    ClientEvent::respond_with(fill(&self.prompts.save_failed, None, "", "")),
                ]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAVE_ARGS: &str = r#"{
        "name": "Ирина", "direction": "Холодильники", "phone": "+79161234567",
        "address": {"city": "Москва", "street": "Тверская", "house_number": "7"}
    }"#;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new("call-1", &DialogueConfig::default(), Some("+74950000000".into())).unwrap()
    }

    fn is_output(event: &ClientEvent, call: &str) -> bool {
        matches!(event, ClientEvent::FunctionOutput { call_id, .. } if call_id == call)
    }

    fn output_json(event: &ClientEvent) -> &Value {
        match event {
            ClientEvent::FunctionOutput { output, .. } => output,
            other => panic!("Expected FunctionOutput, got {other:?}"),
        }
    }

    fn validate(o: &mut Orchestrator, slot: SlotName, call: &str, outcome: ValidationOutcome) -> Vec<ClientEvent> {
        assert_eq!(o.begin_validation(slot, call), ValidationStart::Dispatch);
        o.complete_validation(slot, call, outcome)
    }

    #[test]
    fn success_validates_and_answers_before_continuing() {
        let mut o = orchestrator();
        let events = validate(&mut o, SlotName::Phone, "c1", ValidationOutcome::Valid { normalized: json!("+79161234567") });
        assert_eq!(events.len(), 2);
        assert!(is_output(&events[0], "c1"));
        assert_eq!(events[1], ClientEvent::respond());
        assert!(o.state().phone.is_validated());
        assert_eq!(o.state().phone.retries, 0);
    }

    #[test]
    fn pending_slot_is_not_validated() {
        let mut o = orchestrator();
        o.begin_validation(SlotName::Address, "c1");
        assert_eq!(o.state().address.pending_call(), Some("c1"));
        assert!(!o.state().address.is_validated());
    }

    #[test]
    fn failures_reach_forced_acceptance_within_budget() {
        let mut o = orchestrator();
        for attempt in 1..=3u32 {
            let events = validate(&mut o, SlotName::Phone, &format!("c{attempt}"), ValidationOutcome::invalid("invalid"));
            assert!(!o.state().phone.is_validated());
            if attempt < 3 {
                assert_eq!(o.state().phone.status, SlotStatus::Unvalidated);
                assert_eq!(events[1], ClientEvent::respond());
            } else {
                assert_eq!(o.state().phone.status, SlotStatus::AcceptedUnverified);
                assert_eq!(output_json(&events[0])["accepted_unverified"], true);
                assert!(matches!(&events[1], ClientEvent::ResponseCreate { instructions: Some(w) } if w.contains("phone number")));
            }
        }
        assert!(o.state().phone.is_settled());
    }

    #[test]
    fn success_resets_retry_count() {
        let mut o = orchestrator();
        validate(&mut o, SlotName::Address, "c1", ValidationOutcome::invalid("not_found"));
        assert_eq!(o.state().address.retries, 1);
        validate(&mut o, SlotName::Address, "c2", ValidationOutcome::Valid { normalized: json!({}) });
        assert_eq!(o.state().address.retries, 0);
    }

    #[test]
    fn exhausted_slot_skips_validator_after_reopen() {
        let mut o = orchestrator();
        for i in 0..3 {
            validate(&mut o, SlotName::Address, &format!("c{i}"), ValidationOutcome::invalid("not_found"));
        }
        o.on_caller_transcript("нет, неверно").unwrap();
        assert_eq!(o.state().address.status, SlotStatus::Unvalidated);

        let ValidationStart::Immediate(events) = o.begin_validation(SlotName::Address, "c9") else {
            panic!("Expected an immediate answer");
        };
        assert_eq!(output_json(&events[0])["skipped"], true);
        assert_eq!(o.state().address.status, SlotStatus::AcceptedUnverified);
    }

    #[test]
    fn stale_result_after_correction_does_not_validate() {
        let mut o = orchestrator();
        o.begin_validation(SlotName::Address, "c1");
        let correction = o.on_caller_transcript("Нет, другой адрес").unwrap();
        assert_eq!(correction.slot, SlotName::Address);

        let events = o.complete_validation(SlotName::Address, "c1", ValidationOutcome::Valid { normalized: json!({}) });
        assert!(is_output(&events[0], "c1"));
        assert!(!o.state().address.is_validated());
    }

    #[test]
    fn correction_cancels_and_reprompts_open_slot() {
        let mut o = orchestrator();
        validate(&mut o, SlotName::Address, "c1", ValidationOutcome::Valid { normalized: json!({}) });

        let correction = o.on_caller_transcript("это неверно").unwrap();
        assert_eq!(correction.slot, SlotName::Phone);
        assert_eq!(correction.events[0], ClientEvent::ResponseCancel);
        assert!(matches!(&correction.events[1], ClientEvent::ResponseCreate { instructions: Some(p) } if p.contains("phone number")));
        assert!(o.state().correction_pending);

        assert!(o.on_caller_transcript("Да, всё правильно").is_none());
    }

    #[test]
    fn correction_with_both_validated_reopens_address() {
        let mut o = orchestrator();
        validate(&mut o, SlotName::Address, "a", ValidationOutcome::Valid { normalized: json!({}) });
        validate(&mut o, SlotName::Phone, "p", ValidationOutcome::Valid { normalized: json!("+7") });
        let correction = o.on_caller_transcript("исправьте").unwrap();
        assert_eq!(correction.slot, SlotName::Address);
        assert!(o.state().address.value.is_none());
        assert!(o.state().phone.is_validated());
    }

    #[test]
    fn save_with_unvalidated_slots_is_deferred_with_summary() {
        let mut o = orchestrator();
        let SaveDecision::Deferred(events) = o.on_save_request("s1", SAVE_ARGS) else {
            panic!("Expected a deferred save");
        };
        let out = output_json(&events[0]);
        assert_eq!(out["ok"], false);
        assert_eq!(out["unvalidated"], json!(["phone", "address"]));
        let ClientEvent::ResponseCreate { instructions: Some(prompt) } = &events[1] else {
            panic!("Expected a summary prompt");
        };
        for field in ["Ирина", "Холодильники", "+79161234567", "Москва, Тверская, 7"] {
            assert!(prompt.contains(field), "{field} missing from {prompt}");
        }
        assert!(o.state().awaiting_confirmation);
    }

    #[test]
    fn save_after_read_back_is_taken_as_confirmation() {
        let mut o = orchestrator();
        assert!(matches!(o.on_save_request("s1", SAVE_ARGS), SaveDecision::Deferred(_)));
        let SaveDecision::Persist(record) = o.on_save_request("s2", SAVE_ARGS) else {
            panic!("Expected persist");
        };
        assert_eq!(record.phone2.as_deref(), Some("+74950000000"));
        assert_eq!(o.state().phone.status, SlotStatus::AcceptedUnverified);
    }

    #[test]
    fn correction_between_saves_requires_new_read_back() {
        let mut o = orchestrator();
        assert!(matches!(o.on_save_request("s1", SAVE_ARGS), SaveDecision::Deferred(_)));
        o.on_caller_transcript("нет, другой номер");
        assert!(matches!(o.on_save_request("s2", SAVE_ARGS), SaveDecision::Deferred(_)));
    }

    #[test]
    fn save_with_settled_slots_persists() {
        let mut o = orchestrator();
        validate(&mut o, SlotName::Address, "a", ValidationOutcome::Valid { normalized: json!({}) });
        validate(&mut o, SlotName::Phone, "p", ValidationOutcome::Valid { normalized: json!("+7") });
        assert!(matches!(o.on_save_request("s1", SAVE_ARGS), SaveDecision::Persist(_)));
    }

    #[test]
    fn unreadable_save_arguments_are_rejected() {
        let mut o = orchestrator();
        let SaveDecision::Rejected(events) = o.on_save_request("s1", "{not json") else {
            panic!("Expected rejection");
        };
        assert_eq!(output_json(&events[0])["error"], "invalid_arguments");
    }

    #[test]
    fn save_results_are_spoken() {
        let mut o = orchestrator();
        let ok = o.complete_save("s1", Ok("A-42".into()));
        assert_eq!(output_json(&ok[0])["order_number"], "A-42");
        assert!(matches!(&ok[1], ClientEvent::ResponseCreate { instructions: Some(p) } if p.contains("A-42")));
        assert_eq!(o.state().saved_order.as_deref(), Some("A-42"));

        let failed = o.complete_save("s2", Err("exit 1".into()));
        assert_eq!(output_json(&failed[0])["error"], "save_failed");
        assert!(matches!(&failed[1], ClientEvent::ResponseCreate { instructions: Some(_) }));
    }

    #[test]
    fn skip_guard_only_fires_with_open_slots() {
        let mut o = orchestrator();
        let events = o.on_assistant_transcript("Отлично, перейдём к адресу").unwrap();
        assert_eq!(events[0], ClientEvent::ResponseCancel);
        assert!(o.on_assistant_transcript("Назовите, пожалуйста, улицу").is_none());

        validate(&mut o, SlotName::Address, "a", ValidationOutcome::Valid { normalized: json!({}) });
        validate(&mut o, SlotName::Phone, "p", ValidationOutcome::Valid { normalized: json!("+7") });
        assert!(o.on_assistant_transcript("перейдём дальше").is_none());
    }

    #[test]
    fn skip_guard_asks_for_phone_before_address() {
        let mut o = orchestrator();
        let events = o.on_assistant_transcript("Перейдём дальше").unwrap();
        assert!(matches!(&events[1], ClientEvent::ResponseCreate { instructions: Some(p) } if p.contains("phone number")));

        validate(&mut o, SlotName::Phone, "p", ValidationOutcome::Valid { normalized: json!("+79161234567") });
        let events = o.on_assistant_transcript("Перейдём дальше").unwrap();
        assert!(matches!(&events[1], ClientEvent::ResponseCreate { instructions: Some(p) } if p.contains("address")));
    }

    #[test]
    fn persisted_record_carries_normalized_values() {
        let mut o = orchestrator();
        validate(&mut o, SlotName::Phone, "p", ValidationOutcome::Valid { normalized: json!("+79161234567") });
        validate(
            &mut o,
            SlotName::Address,
            "a",
            ValidationOutcome::Valid {
                normalized: json!({
                    "city": "Москва", "street": "Тверская улица", "house_number": "7",
                    "latitude": 55.7602, "longitude": 37.6085
                }),
            },
        );
        let args = r#"{"name": "Ирина", "phone": "8 916 123-45-67",
                       "address": {"city": "москва", "street": "тверская", "house_number": "7", "apartment": "12"}}"#;
        let SaveDecision::Persist(record) = o.on_save_request("s1", args) else {
            panic!("Expected persist");
        };
        assert_eq!(record.phone, "+79161234567");
        assert_eq!(record.address.street, "Тверская улица");
        assert_eq!(record.address.city, "Москва");
        assert_eq!(record.address.apartment.as_deref(), Some("12"));
        assert_eq!(record.address.latitude, Some(55.7602));
    }
}
