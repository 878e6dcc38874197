//! JSON wire payloads for the DHT control messages. Node ids travel as
//! 40-character lowercase hex; values as arrays of u8.

use serde::{Deserialize, Serialize};

use super::contact::Contact;
use super::node_id::NodeId;
use crate::utils::Result;

/// Body of DHT_FIND_NODE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodePayload {
    pub target: String,
    pub sender: String,
}

/// Body of DHT_FIND_VALUE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValuePayload {
    pub key: String,
    pub sender: String,
}

/// One contact as it appears on the wire, in DHT_FIND_NODE_REPLY arrays and
/// DHT_FIND_VALUE_REPLY contact lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl ContactInfo {
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            id: contact.id.to_hex(),
            address: contact.address.clone(),
            port: contact.port,
        }
    }

    pub fn to_contact(&self) -> Result<Contact> {
        let id = NodeId::from_hex(&self.id)?;
        Ok(Contact::new(id, &self.address, self.port))
    }
}

/// Body of DHT_FIND_VALUE_REPLY: either the value, or closer contacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueReply {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<ContactInfo>>,
}

/// Body of DHT_STORE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePayload {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: u64,
}

/// Body of DHT_STORE_REPLY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn encode_contacts(contacts: &[Contact]) -> Result<Vec<u8>> {
    let wire: Vec<ContactInfo> = contacts.iter().map(ContactInfo::from_contact).collect();
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode_contacts(data: &[u8]) -> Result<Vec<Contact>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let wire: Vec<ContactInfo> = serde_json::from_slice(data)?;
    wire.iter().map(ContactInfo::to_contact).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_node_schema() {
        let payload = FindNodePayload {
            target: NodeId::from_key("t").to_hex(),
            sender: NodeId::from_key("s").to_hex(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["target"].as_str().unwrap().len(), 40);
        assert_eq!(json["sender"].as_str().unwrap().len(), 40);
    }

    #[test]
    fn test_contact_list_round_trip() {
        let contacts = vec![
            Contact::new(NodeId::from_key("a"), "127.0.0.1", 4001),
            Contact::new(NodeId::from_key("b"), "10.0.0.9", 4002),
        ];

        let bytes = encode_contacts(&contacts).unwrap();
        let decoded = decode_contacts(&bytes).unwrap();
        assert_eq!(decoded, contacts);
    }

    #[test]
    fn test_decode_contacts_empty_input() {
        assert!(decode_contacts(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_contacts_rejects_bad_id() {
        let bytes = br#"[{"id": "zz", "address": "127.0.0.1", "port": 4001}]"#;
        assert!(decode_contacts(bytes).is_err());
    }

    #[test]
    fn test_find_value_reply_variants() {
        let hit = FindValueReply {
            found: true,
            value: Some(vec![4, 2]),
            contacts: None,
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert!(json.contains("\"found\":true"));
        assert!(!json.contains("contacts"));

        let miss: FindValueReply =
            serde_json::from_str(r#"{"found": false, "contacts": []}"#).unwrap();
        assert!(!miss.found);
        assert!(miss.value.is_none());
        assert_eq!(miss.contacts.unwrap().len(), 0);
    }

    #[test]
    fn test_store_reply_error_is_optional() {
        let ok = StoreReply {
            success: true,
            error: None,
        };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"success":true}"#);

        let failed: StoreReply =
            serde_json::from_str(r#"{"success": false, "error": "Value too large"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("Value too large"));
    }
}
