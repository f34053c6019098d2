//! Test utilities for telepathy_core
//!
//! This module provides a scripted [`PeerNetwork`] that records everything a
//! coordinator sends and lets tests inject incoming messages and status
//! reports by hand.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use tokio::time::Instant;

use crate::error::{Result, TelepathyError};
use crate::network::{
    BoxFuture, Message, MessageHandler, PeerInfo, PeerNetwork, PeerStatus, StatusHandler,
};

/// A network that delivers nothing on its own.
#[derive(Default)]
pub struct RecordingNetwork {
    peer_id: String,
    sent: Mutex<Vec<(String, Message)>>,
    broadcasts: Mutex<Vec<Message>>,
    message_handlers: RwLock<HashMap<String, MessageHandler>>,
    status_handlers: RwLock<Vec<StatusHandler>>,
    failing: AtomicBool,
    bootstrap_script: Mutex<VecDeque<bool>>,
    bootstrap_attempts: Mutex<Vec<Instant>>,
}

impl RecordingNetwork {
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            ..Default::default()
        }
    }

    /// Messages passed to `send_message`, with their recipient.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages passed to `broadcast`.
    pub fn broadcasts(&self) -> Vec<Message> {
        self.broadcasts.lock().unwrap().clone()
    }

    /// Make every send and broadcast fail with a delivery error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Results for upcoming bootstrap attempts; unscripted attempts fail.
    pub fn script_bootstrap(&self, results: impl IntoIterator<Item = bool>) {
        self.bootstrap_script.lock().unwrap().extend(results);
    }

    pub fn bootstrap_attempts(&self) -> Vec<Instant> {
        self.bootstrap_attempts.lock().unwrap().clone()
    }

    pub fn has_handler(&self, message_type: &str) -> bool {
        self.message_handlers
            .read()
            .unwrap()
            .contains_key(message_type)
    }

    /// Run the registered handler for `message`, if any.
    pub async fn deliver(&self, message: Message) {
        let handler = self
            .message_handlers
            .read()
            .unwrap()
            .get(&message.message_type)
            .cloned();
        if let Some(handler) = handler {
            handler(message).await;
        }
    }

    /// Report a status change for `peer_id` to every status handler.
    pub async fn report_status(&self, peer_id: &str, status: PeerStatus) {
        let handlers = self.status_handlers.read().unwrap().clone();
        for handler in handlers {
            handler(peer_id.to_string(), status).await;
        }
    }
}

impl PeerNetwork for RecordingNetwork {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn on_message(&self, message_type: &str, handler: MessageHandler) {
        self.message_handlers
            .write()
            .unwrap()
            .insert(message_type.to_string(), handler);
    }

    fn on_peer_status_change(&self, handler: StatusHandler) {
        self.status_handlers.write().unwrap().push(handler);
    }

    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        message: Message,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TelepathyError::DeliveryFailure(format!("{peer_id} unreachable")));
            }
            let message = message.with_sender(self.peer_id.clone());
            let entry = (peer_id.to_string(), message);
            self.sent.lock().unwrap().push(entry);
            Ok(true)
        })
    }

    fn broadcast<'a>(&'a self, message: Message) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TelepathyError::DeliveryFailure("network down".to_string()));
            }
            let message = message.with_sender(self.peer_id.clone());
            self.broadcasts.lock().unwrap().push(message);
            Ok(1)
        })
    }

    fn connect_to_peer<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn connect_to_bootstrap<'a>(&'a self, _host: &'a str, _port: u16) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.bootstrap_attempts.lock().unwrap().push(Instant::now());
            self.bootstrap_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(false)
        })
    }

    fn known_peers(&self) -> Vec<PeerInfo> {
        Vec::new()
    }
}
