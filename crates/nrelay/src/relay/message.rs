use crate::{Error, Event, Result};
use serde_json::Value;

/// Relay reply to a published event (NIP-20 `OK`)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandResult {
    pub event_id: String,
    pub status: bool,
    pub message: String,
}

/// Messages sent by relays, received by clients
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RelayMessage {
    OK(CommandResult),
    Eose(String),
    Event { sub_id: String, event: Event },
    Notice(String),
    Closed { sub_id: String, message: String },
}

impl RelayMessage {
    pub fn eose(subid: &str) -> Self {
        RelayMessage::Eose(subid.to_owned())
    }

    pub fn notice(msg: &str) -> Self {
        RelayMessage::Notice(msg.to_owned())
    }

    pub fn ok(event_id: &str, status: bool, message: &str) -> Self {
        RelayMessage::OK(CommandResult {
            event_id: event_id.to_owned(),
            status,
            message: message.to_owned(),
        })
    }

    pub fn event(event: Event, sub_id: &str) -> Self {
        RelayMessage::Event {
            sub_id: sub_id.to_owned(),
            event,
        }
    }

    pub fn closed(sub_id: &str, message: &str) -> Self {
        RelayMessage::Closed {
            sub_id: sub_id.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn from_json(msg: &str) -> Result<RelayMessage> {
        if msg.is_empty() {
            return Err(Error::Empty);
        }

        // shortest valid message is ["EOSE","x"]
        if msg.len() < 12 {
            return Err(Error::DecodeFailed("message too short".into()));
        }

        let unrecognized = || Error::DecodeFailed(format!("unrecognized message type: '{msg}'"));

        let mut parts: Vec<Value> = serde_json::from_str(msg).map_err(|_| unrecognized())?;
        let typ = parts
            .first()
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(unrecognized)?;

        match typ.as_str() {
            // ["EVENT", <subscription id>, <event JSON>]
            "EVENT" => {
                let Some(sub_id) = parts.get(1).and_then(Value::as_str).map(str::to_owned)
                else {
                    return Err(Error::DecodeFailed("Invalid EVENT format".into()));
                };
                let Some(raw) = parts.get_mut(2).map(Value::take) else {
                    return Err(Error::DecodeFailed("Invalid EVENT format".into()));
                };
                let event: Event = serde_json::from_value(raw)
                    .map_err(|e| Error::DecodeFailed(format!("invalid event: {e}")))?;
                Ok(RelayMessage::Event { sub_id, event })
            }

            // ["EOSE", <subscription_id>]
            "EOSE" => match parts.get(1).and_then(Value::as_str) {
                Some(subid) => Ok(Self::eose(subid)),
                None => Err(Error::DecodeFailed(
                    "Invalid subscription ID or format".into(),
                )),
            },

            // ["OK", <event_id>, <true|false>, <message>]
            "OK" => {
                let (Some(event_id), Some(status)) = (
                    parts.get(1).and_then(Value::as_str),
                    parts.get(2),
                ) else {
                    return Err(unrecognized());
                };
                let Some(status) = status.as_bool() else {
                    return Err(Error::DecodeFailed("bad boolean value".into()));
                };
                let message = parts.get(3).and_then(Value::as_str).unwrap_or("");
                Ok(Self::ok(event_id, status, message))
            }

            // ["NOTICE", <message>]
            "NOTICE" => match parts.get(1).and_then(Value::as_str) {
                Some(notice) => Ok(Self::notice(notice)),
                None => Err(unrecognized()),
            },

            // ["CLOSED", <subscription_id>, <message>]
            "CLOSED" => match parts.get(1).and_then(Value::as_str) {
                Some(subid) => Ok(Self::closed(
                    subid,
                    parts.get(2).and_then(Value::as_str).unwrap_or(""),
                )),
                None => Err(Error::DecodeFailed(
                    "Invalid subscription ID or format".into(),
                )),
            },

            _ => Err(unrecognized()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT_JSON: &str = r#"{"id":"70b10f70c1318967eddf12527799411b1a9780ad9c43858f5e5fcd45486a13a5","pubkey":"379e863e8357163b5bce5d2688dc4f1dcc2d505222fb8d74db600f30535dfdfe","created_at":1612809991,"kind":1,"tags":[],"content":"test","sig":"273a9cd5d11455590f4359500bccb7a89428262b96b3ea87a756b770964472f8c3e87f5d5e64d8d2e859a71462a3f477b554565c4f2f326cb01dd7620db71502"}"#;

    #[test]
    fn test_handle_various_messages() -> Result<()> {
        let event = Event::from_json(EVENT_JSON)?;
        let event_msg = format!(r#"["EVENT", "random_string", {EVENT_JSON}]"#);

        let tests = vec![
            // Valid cases
            (
                // shortest valid message
                r#"["EOSE","x"]"#.to_owned(),
                Ok(RelayMessage::eose("x")),
            ),
            (
                // also very short
                r#"["NOTICE",""]"#.to_owned(),
                Ok(RelayMessage::notice("")),
            ),
            (
                r#"["NOTICE","Invalid event format!"]"#.to_owned(),
                Ok(RelayMessage::notice("Invalid event format!")),
            ),
            (event_msg, Ok(RelayMessage::event(event, "random_string"))),
            (
                r#"["EOSE", "random-subscription-id" ]"#.to_owned(),
                Ok(RelayMessage::eose("random-subscription-id")),
            ),
            (
                r#"["OK","b1a649ebe8b435ec71d3784793f3bbf4b93e64e17568a741aecd4c7ddeafce30",true,"pow: difficulty 25>=24"]"#.to_owned(),
                Ok(RelayMessage::ok(
                    "b1a649ebe8b435ec71d3784793f3bbf4b93e64e17568a741aecd4c7ddeafce30",
                    true,
                    "pow: difficulty 25>=24",
                )),
            ),
            (
                r#"["CLOSED","sub1","error: shutting down"]"#.to_owned(),
                Ok(RelayMessage::closed("sub1", "error: shutting down")),
            ),
            // Invalid cases
            (
                r#"["EVENT","random_string"]"#.to_owned(),
                Err(Error::DecodeFailed("Invalid EVENT format".into())),
            ),
            (
                r#"["EOSE"]"#.to_owned(),
                Err(Error::DecodeFailed("message too short".into())),
            ),
            (
                r#"["NOTICE": 404]"#.to_owned(),
                Err(Error::DecodeFailed("unrecognized message type: '[\"NOTICE\": 404]'".into())),
            ),
            (
                r#"["OK","event_id"]"#.to_owned(),
                Err(Error::DecodeFailed(
                    "unrecognized message type: '[\"OK\",\"event_id\"]'".into(),
                )),
            ),
            (
                r#"["OK","b1a649ebe8b435ec71d3784793f3bbf4b93e64e17568a741aecd4c7ddeafce30","yes",""]"#.to_owned(),
                Err(Error::DecodeFailed("bad boolean value".into())),
            ),
            (
                r#"["AUTH","challenge"]"#.to_owned(),
                Err(Error::DecodeFailed(
                    "unrecognized message type: '[\"AUTH\",\"challenge\"]'".into(),
                )),
            ),
        ];

        for (input, expected) in tests {
            match expected {
                Ok(expected_msg) => {
                    let result = RelayMessage::from_json(&input);
                    assert_eq!(
                        result?, expected_msg,
                        "Expected {:?} for input: {}",
                        expected_msg, input
                    );
                }
                Err(expected_err) => {
                    let result = RelayMessage::from_json(&input);
                    assert!(
                        matches!(result, Err(ref e) if *e.to_string() == expected_err.to_string()),
                        "Expected error {:?} for input: {}, but got: {:?}",
                        expected_err,
                        input,
                        result
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn incomplete_event_is_rejected() {
        let msg = r#"["EVENT","random_string",{"id":"70b10f70c1318967eddf12527799411b1a9780ad9c43858f5e5fcd45486a13a5"}]"#;
        let err = RelayMessage::from_json(msg).unwrap_err();
        assert!(err.to_string().contains("invalid event"), "{err}");
    }

    #[test]
    fn empty_message() {
        assert!(matches!(RelayMessage::from_json(""), Err(Error::Empty)));
    }
}
