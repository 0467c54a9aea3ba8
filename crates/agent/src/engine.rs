//! The perception engine: observes the document, maintains stable
//! candidate identity, and emits minimal deltas under mutation.
//!
//! All observer activity funnels into one debounced update. Any relevant
//! mutation arms a 50 ms window; at fire the engine extracts the current
//! candidate set, diffs it against the previous one, and emits a delta
//! only when something actually changed. Modal and menu transitions are
//! reported immediately as page events, outside the debounce.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use tabsense_core::types::ActionCandidate;
use tabsense_dom::{Document, Mutation, NodeId};

use crate::diff::{diff_candidates, CandidateDiff};
use crate::extract::{extract_candidates, is_interactive};
use crate::identity::IdentityMap;

pub type SharedDocument = Arc<Mutex<Document>>;
pub type SharedIdentity = Arc<Mutex<IdentityMap>>;

/// Attributes whose changes schedule an update; everything else is noise.
pub const OBSERVED_ATTRIBUTES: &[&str] = &[
    "disabled",
    "aria-disabled",
    "aria-expanded",
    "aria-checked",
    "aria-selected",
    "aria-label",
    "class",
    "style",
    "hidden",
    "value",
];

const DEFAULT_DEBOUNCE_MS: u64 = 50;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A non-empty candidate delta.
    Delta(CandidateDiff),
    /// modal_opened / modal_closed / menu_opened / menu_closed.
    PageEvent { name: String },
}

pub struct PerceptionEngine {
    doc: SharedDocument,
    identity: SharedIdentity,
    previous: Arc<Mutex<Vec<ActionCandidate>>>,
    debounce: Duration,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    force_tx: mpsc::UnboundedSender<()>,
    force_rx: Option<mpsc::UnboundedReceiver<()>>,
}

impl PerceptionEngine {
    pub fn new(
        doc: SharedDocument,
        identity: SharedIdentity,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (force_tx, force_rx) = mpsc::unbounded_channel();
        (
            Self {
                doc,
                identity,
                previous: Arc::new(Mutex::new(Vec::new())),
                debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
                events_tx,
                force_tx,
                force_rx: Some(force_rx),
            },
            events_rx,
        )
    }

    /// Override the debounce window (tests use a short one).
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Begin watching. Returns the initial candidate set; the caller
    /// sends it as a snapshot; everything after arrives as deltas.
    pub async fn start(&mut self) -> Vec<ActionCandidate> {
        let mutations = {
            let mut doc = self.doc.lock().await;
            doc.watch()
        };

        let initial = {
            let doc = self.doc.lock().await;
            let mut ids = self.identity.lock().await;
            extract_candidates(&doc, &mut ids)
        };
        *self.previous.lock().await = initial.clone();

        let force_rx = self
            .force_rx
            .take()
            .expect("engine started twice");
        tokio::spawn(run_loop(
            self.doc.clone(),
            self.identity.clone(),
            self.previous.clone(),
            mutations,
            force_rx,
            self.events_tx.clone(),
            self.debounce,
        ));
        initial
    }

    /// Re-extract and reset the diff baseline. Used when the gateway
    /// requests a fresh snapshot.
    pub async fn snapshot(&self) -> Vec<ActionCandidate> {
        let doc = self.doc.lock().await;
        let mut ids = self.identity.lock().await;
        let current = extract_candidates(&doc, &mut ids);
        drop(ids);
        drop(doc);
        *self.previous.lock().await = current.clone();
        current
    }

    /// Bypass the debounce and emit any pending difference immediately.
    pub fn force_update(&self) {
        let _ = self.force_tx.send(());
    }
}

async fn run_loop(
    doc: SharedDocument,
    identity: SharedIdentity,
    previous: Arc<Mutex<Vec<ActionCandidate>>>,
    mut mutations: mpsc::UnboundedReceiver<Mutation>,
    mut force_rx: mpsc::UnboundedReceiver<()>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    debounce: Duration,
) {
    loop {
        let armed = tokio::select! {
            m = mutations.recv() => match m {
                Some(m) => {
                    emit_page_events(&doc, &m, &events_tx).await;
                    is_relevant(&doc, &m).await
                }
                None => break,
            },
            f = force_rx.recv() => match f {
                Some(()) => {
                    run_update(&doc, &identity, &previous, &events_tx).await;
                    continue;
                }
                None => break,
            },
        };
        if !armed {
            continue;
        }

        // Debounce: coalesce everything that lands within the window. A
        // forced update flushes early.
        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = force_rx.recv() => break,
                m = mutations.recv() => match m {
                    Some(m) => emit_page_events(&doc, &m, &events_tx).await,
                    None => break,
                },
            }
        }

        run_update(&doc, &identity, &previous, &events_tx).await;
    }
    debug!("perception engine loop ended");
}

/// Does this mutation warrant recomputing the candidate set?
async fn is_relevant(doc: &SharedDocument, m: &Mutation) -> bool {
    match m {
        Mutation::Attribute { attr, .. } => OBSERVED_ATTRIBUTES.contains(&attr.as_str()),
        Mutation::ChildAdded { target, .. } | Mutation::ChildRemoved { target, .. } => {
            let doc = doc.lock().await;
            subtree_has_interactive(&doc, *target)
        }
        Mutation::Scrolled { .. } | Mutation::Resized { .. } => true,
        Mutation::Text { .. } => false,
    }
}

fn subtree_has_interactive(doc: &Document, node: NodeId) -> bool {
    doc.descendants(node)
        .into_iter()
        .any(|id| doc.get(id).map(is_interactive).unwrap_or(false))
}

/// Roles the modal/menu watcher reacts to.
fn overlay_event(doc: &Document, node: NodeId, opened: bool) -> Option<String> {
    for id in doc.descendants(node) {
        let role = doc
            .get(id)
            .and_then(|el| el.attr("role"))
            .unwrap_or("")
            .to_lowercase();
        match role.as_str() {
            "dialog" | "alertdialog" => {
                return Some(if opened { "modal_opened" } else { "modal_closed" }.into());
            }
            "menu" | "listbox" => {
                return Some(if opened { "menu_opened" } else { "menu_closed" }.into());
            }
            _ => {}
        }
    }
    None
}

async fn emit_page_events(
    doc: &SharedDocument,
    m: &Mutation,
    events_tx: &mpsc::UnboundedSender<EngineEvent>,
) {
    let (target, opened) = match m {
        Mutation::ChildAdded { target, .. } => (*target, true),
        Mutation::ChildRemoved { target, .. } => (*target, false),
        _ => return,
    };
    let name = {
        let doc = doc.lock().await;
        overlay_event(&doc, target, opened)
    };
    if let Some(name) = name {
        let _ = events_tx.send(EngineEvent::PageEvent { name });
    }
}

async fn run_update(
    doc: &SharedDocument,
    identity: &SharedIdentity,
    previous: &Arc<Mutex<Vec<ActionCandidate>>>,
    events_tx: &mpsc::UnboundedSender<EngineEvent>,
) {
    let current = {
        let doc = doc.lock().await;
        let mut ids = identity.lock().await;
        ids.prune(&doc);
        extract_candidates(&doc, &mut ids)
    };

    let mut prev = previous.lock().await;
    let diff = diff_candidates(&prev, &current);
    if !diff.is_empty() {
        if events_tx.send(EngineEvent::Delta(diff)).is_err() {
            warn!("engine delta receiver dropped");
        }
    }
    *prev = current;
}
