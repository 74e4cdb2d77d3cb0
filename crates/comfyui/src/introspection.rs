//! Interpretation of ComfyUI history and node schema responses.

use aihub_core::engine::{aggregate_error_messages, Enumerations, JobOutcome};
use serde_json::Value;

/// Work out how a prompt ended from a `GET /history/{prompt_id}` body.
///
/// The body maps prompt ids to records whose `status` holds a
/// `status_str` and a list of `[event_name, data]` messages.
pub fn outcome_from_history(history: &Value, prompt_id: &str) -> JobOutcome {
    let Some(status) = history.get(prompt_id).and_then(|record| record.get("status")) else {
        return JobOutcome::Unknown;
    };

    if status.get("status_str").and_then(Value::as_str) != Some("error") {
        return JobOutcome::Succeeded;
    }

    let messages = status
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(|entry| {
                    let (event, data) = (entry.get(0)?.as_str()?, entry.get(1)?);
                    (event == "execution_error").then(|| {
                        data.get("exception_message")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    JobOutcome::Failed {
        message: aggregate_error_messages(messages),
    }
}

/// Extract sampler and scheduler names from `GET /object_info/KSampler`.
pub fn enumerations_from_object_info(info: &Value) -> Enumerations {
    let required = &info["KSampler"]["input"]["required"];
    Enumerations {
        samplers: choice_list(&required["sampler_name"]),
        schedulers: choice_list(&required["scheduler"]),
    }
}

/// Input specs are `[choices, options?]` where `choices` is a list of names.
fn choice_list(spec: &Value) -> Vec<String> {
    spec.get(0)
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn success_history() {
        let history = json!({"p1": {"status": {"status_str": "success", "completed": true, "messages": []}}});
        assert_eq!(outcome_from_history(&history, "p1"), JobOutcome::Succeeded);
    }

    #[test]
    fn error_history_aggregates_execution_errors() {
        let history = json!({"p1": {"status": {"status_str": "error", "messages": [
            ["execution_start", {"prompt_id": "p1"}],
            ["execution_error", {"exception_message": "Out of memory\n"}],
            ["execution_error", {"exception_message": "VAE mismatch"}]
        ]}}});
        assert_matches!(
            outcome_from_history(&history, "p1"),
            JobOutcome::Failed { message } if message == "Out of memory, VAE mismatch"
        );
    }

    #[test]
    fn error_without_messages_is_unknown_error() {
        let history = json!({"p1": {"status": {"status_str": "error"}}});
        assert_matches!(
            outcome_from_history(&history, "p1"),
            JobOutcome::Failed { message } if message == "Unknown error"
        );
    }

    #[test]
    fn missing_record_is_unknown() {
        assert_eq!(outcome_from_history(&json!({}), "p1"), JobOutcome::Unknown);
    }

    #[test]
    fn parses_ksampler_choices() {
        let info = json!({"KSampler": {"input": {"required": {
            "sampler_name": [["euler", "dpmpp_2m"], {}],
            "scheduler": [["normal", "karras"]],
            "steps": ["INT", {"default": 20}]
        }}}});
        let enumerations = enumerations_from_object_info(&info);
        assert_eq!(enumerations.samplers, vec!["euler", "dpmpp_2m"]);
        assert_eq!(enumerations.schedulers, vec!["normal", "karras"]);
    }

    #[test]
    fn unexpected_schema_yields_empty_lists() {
        let enumerations = enumerations_from_object_info(&json!({"error": "nope"}));
        assert!(enumerations.samplers.is_empty());
        assert!(enumerations.schedulers.is_empty());
    }
}
