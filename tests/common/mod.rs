//! Shared fixtures for integration tests
#![allow(dead_code)]

use did_agent::{
    did::{Identifier, KeyPair, Relationship, Service},
    handler::{Handler, HandlerOptions, ProcessRequest},
    storage::Storage,
    ticket::Ticket,
};
use std::sync::{atomic::AtomicBool, Arc};

pub const DIFFICULTY: u32 = 8;

/// Identifier with a `master` authentication key and one service
pub fn identifier(method: &str, subject: &str) -> (Identifier, KeyPair) {
    let key = KeyPair::generate();
    let mut id = Identifier::new(method, subject).unwrap();
    let key_id = id.add_key("master", &key).unwrap();
    id.add_relationship(&key_id, Relationship::Authentication).unwrap();
    id.add_service(Service {
        id: "#profile".to_string(),
        service_type: "LinkedDomains".to_string(),
        service_endpoint: "https://example.com".to_string(),
    });
    (id, key)
}

/// Solved and signed ticket for `id`
pub fn ticket(id: &Identifier, key: &KeyPair) -> Ticket {
    let mut ticket = Ticket::new(id, "master").unwrap();
    let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
    ticket.sign(key, &hex::decode(digest).unwrap());
    ticket
}

pub fn request(id: &Identifier, key: &KeyPair) -> ProcessRequest {
    ProcessRequest::new(ticket(id, key))
}

pub fn handler(store: Arc<dyn Storage>) -> Handler {
    Handler::new(HandlerOptions {
        difficulty: DIFFICULTY,
        ..HandlerOptions::new(vec!["algo".to_string()], store)
    })
}
