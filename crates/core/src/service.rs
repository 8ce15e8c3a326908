//! The boundary to the remote service's RPC surface.
//!
//! Everything network-shaped lives behind [`RemoteService`]: the mapping
//! layer issues synchronous, blocking calls in exactly the order a caller's
//! logical operation requires and imposes no ordering, retry or timeout
//! policy of its own. Transport implementations own authentication,
//! cancellation and timeouts.

use remora_wire::{ObjectUri, WireStruct};

/// Which service channel an entity type is reached through. Recorded on each
/// [`crate::EntityDescriptor`] and threaded through generic lookups so one
/// trait method can serve every entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    TestManagement,
    Tracker,
    Builder,
}

/// All errors a [`RemoteService`] implementation can return.
///
/// The mapping layer never interprets these beyond annotating them with the
/// logical operation in flight (see [`crate::Error::Remote`]).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Network-level failure: connection, TLS, timeout.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service rejected the session's credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// A server-side fault raised by the service itself.
    #[error("server fault: {0}")]
    Fault(String),
}

/// The remote RPC surface consumed by the mapping layer.
///
/// ## Not-found semantics
///
/// `lookup_by_id` and `lookup_by_uri` return a [`WireStruct`] whose
/// `unresolvable` flag is the service's authoritative not-found marker.
/// Implementations must set it rather than erroring, so callers can
/// distinguish "does not exist" from transport failure.
///
/// ## Transaction lifecycle
///
/// `begin_transaction` opens a service-side transaction bound to the
/// session; `end_transaction(true)` commits it and `end_transaction(false)`
/// rolls it back. The [`crate::Transaction`] wrapper guarantees one `end`
/// call for every `begin` on all exit paths — implementations may treat an
/// unbalanced `end` as a fault.
///
/// ## Index spaces
///
/// `update_test_record_at_index` indexes into the run's full declared record
/// list, while the record/step attachment operations index into the
/// executed-record array only. The two spaces are distinct; callers resolve
/// indices before reaching this trait.
pub trait RemoteService: Send + Sync {
    // ── Generic entity plumbing ─────────────────────────────────────────

    /// Fetch one entity by its natural identifier. `scope` carries the
    /// project id for project-scoped entity types, `None` otherwise.
    fn lookup_by_id(
        &self,
        channel: Channel,
        type_id: &str,
        scope: Option<&str>,
        id: &str,
    ) -> Result<WireStruct, RemoteError>;

    /// Fetch one entity by its URI handle.
    fn lookup_by_uri(&self, channel: Channel, uri: &ObjectUri) -> Result<WireStruct, RemoteError>;

    /// The values of a named enumeration catalog. `scope` selects the
    /// project-specific catalog variant where one exists.
    fn enum_options(&self, enum_id: &str, scope: Option<&str>) -> Result<Vec<String>, RemoteError>;

    // ── Test runs ───────────────────────────────────────────────────────

    /// Create a test run from a template; returns the new run's URI.
    fn create_test_run(
        &self,
        project_id: &str,
        test_run_id: &str,
        template: &str,
    ) -> Result<ObjectUri, RemoteError>;

    /// Write the full run representation back. `body` carries every field,
    /// including the already-flushed custom-field collection.
    fn update_test_run(&self, body: &WireStruct) -> Result<(), RemoteError>;

    /// Search runs (or run templates). The service exposes plain,
    /// field-limited and count-limited RPC variants; implementations pick
    /// the concrete RPC from the arguments.
    fn search_test_runs(
        &self,
        query: &str,
        sort: &str,
        fields: &[String],
        limit: i32,
        templates: bool,
    ) -> Result<Vec<WireStruct>, RemoteError>;

    // ── Test records ────────────────────────────────────────────────────

    /// Append an execution record to the run.
    fn add_test_record(&self, run: &ObjectUri, record: &WireStruct) -> Result<(), RemoteError>;

    /// Replace the record at `index` in the run's full declared record list.
    fn update_test_record_at_index(
        &self,
        run: &ObjectUri,
        index: usize,
        record: &WireStruct,
    ) -> Result<(), RemoteError>;

    // ── Attachments ─────────────────────────────────────────────────────
    // Payloads are raw bytes plus the original filename and a readable
    // title; delete and get address attachments by filename.

    fn add_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), RemoteError>;

    fn update_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), RemoteError>;

    fn delete_run_attachment(&self, run: &ObjectUri, filename: &str) -> Result<(), RemoteError>;

    /// Unresolvable struct when no attachment has that filename.
    fn get_run_attachment(
        &self,
        run: &ObjectUri,
        filename: &str,
    ) -> Result<WireStruct, RemoteError>;

    fn list_run_attachments(&self, run: &ObjectUri) -> Result<Vec<WireStruct>, RemoteError>;

    /// `record_index` is an executed-only index (see trait docs).
    fn add_record_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), RemoteError>;

    fn delete_record_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        filename: &str,
    ) -> Result<(), RemoteError>;

    #[allow(clippy::too_many_arguments)]
    fn add_step_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        step_index: usize,
        filename: &str,
        title: &str,
        data: &[u8],
    ) -> Result<(), RemoteError>;

    fn delete_step_attachment(
        &self,
        run: &ObjectUri,
        record_index: usize,
        step_index: usize,
        filename: &str,
    ) -> Result<(), RemoteError>;

    // ── Wiki content ────────────────────────────────────────────────────

    fn wiki_content(&self, run: &ObjectUri) -> Result<WireStruct, RemoteError>;

    /// `None` clears the wiki content (the service accepts an explicit nil).
    fn update_wiki_content(
        &self,
        run: &ObjectUri,
        content: Option<&WireStruct>,
    ) -> Result<(), RemoteError>;

    // ── Summary defects ─────────────────────────────────────────────────

    /// Create the run's summary-defect work item; returns its URI.
    fn create_summary_defect(
        &self,
        run: &ObjectUri,
        template: Option<&ObjectUri>,
    ) -> Result<ObjectUri, RemoteError>;

    /// Create or update the summary defect with aggregate result counts.
    #[allow(clippy::too_many_arguments)]
    fn update_summary_defect(
        &self,
        run: &ObjectUri,
        source: &str,
        total_failures: i32,
        total_errors: i32,
        total_tests: i32,
        template: Option<&ObjectUri>,
    ) -> Result<ObjectUri, RemoteError>;

    // ── Work items ──────────────────────────────────────────────────────

    /// Query work items. `fields` limits which remote fields are populated
    /// on the results; empty means all.
    fn query_work_items(
        &self,
        query: &str,
        fields: &[String],
    ) -> Result<Vec<WireStruct>, RemoteError>;

    /// The work items contained in a document; `deep` includes nested items
    /// recursively.
    fn document_work_items(
        &self,
        document: &ObjectUri,
        deep: bool,
    ) -> Result<Vec<WireStruct>, RemoteError>;

    // ── Transactions ────────────────────────────────────────────────────

    fn begin_transaction(&self) -> Result<(), RemoteError>;

    fn end_transaction(&self, commit: bool) -> Result<(), RemoteError>;
}
