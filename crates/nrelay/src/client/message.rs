use crate::{Error, Event, Filter};
use serde_json::json;

/// Messages sent by clients, received by relays
#[derive(Debug)]
pub enum ClientMessage<'a> {
    Event(&'a Event),
    Req {
        sub_id: String,
        filters: Vec<Filter>,
    },
    Close {
        sub_id: String,
    },
}

impl<'a> ClientMessage<'a> {
    pub fn event(event: &'a Event) -> Self {
        ClientMessage::Event(event)
    }

    pub fn req(sub_id: String, filters: Vec<Filter>) -> Self {
        ClientMessage::Req { sub_id, filters }
    }

    pub fn close(sub_id: String) -> Self {
        ClientMessage::Close { sub_id }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(match self {
            Self::Event(event) => json!(["EVENT", event]).to_string(),
            Self::Req { sub_id, filters } => {
                let mut req = vec![json!("REQ"), json!(sub_id)];
                if filters.is_empty() {
                    req.push(json!({}));
                }
                for filter in filters {
                    req.push(serde_json::to_value(filter)?);
                }
                serde_json::Value::Array(req).to_string()
            }
            Self::Close { sub_id } => json!(["CLOSE", sub_id]).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoteId, Pubkey};

    #[test]
    fn req_wire_format() {
        let filter = Filter::new().kinds([1]).since(1700000000).limit(25);
        let msg = ClientMessage::req("sub1".to_owned(), vec![filter]);
        assert_eq!(
            msg.to_json().unwrap(),
            r#"["REQ","sub1",{"kinds":[1],"since":1700000000,"limit":25}]"#
        );

        let empty = ClientMessage::req("sub2".to_owned(), vec![]);
        assert_eq!(empty.to_json().unwrap(), r#"["REQ","sub2",{}]"#);
    }

    #[test]
    fn close_and_event_wire_format() {
        let close = ClientMessage::close("sub1".to_owned());
        assert_eq!(close.to_json().unwrap(), r#"["CLOSE","sub1"]"#);

        let event = Event {
            id: NoteId::new([0xab; 32]),
            pubkey: Pubkey::new([0xcd; 32]),
            created_at: 1,
            kind: 1,
            tags: vec![vec!["p".to_owned(), "cd".repeat(32)]],
            content: "hi".to_owned(),
            sig: "00".to_owned(),
            extra: Default::default(),
        };
        let json = ClientMessage::event(&event).to_json().unwrap();
        assert!(json.starts_with(r#"["EVENT",{"#));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[1]["id"], "ab".repeat(32));
        assert_eq!(parsed[1]["content"], "hi");
    }
}
