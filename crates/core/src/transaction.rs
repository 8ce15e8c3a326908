//! Scoped transaction boundaries around multi-step mutations.
//!
//! The service recognizes session-bound transaction boundaries; a sequence
//! of mutating calls wrapped in one fails or lands as a unit. The wrapper
//! guarantees exactly one `end_transaction` for every `begin_transaction`
//! on every exit path: an uncommitted [`Transaction`] rolls back when
//! dropped, so an early `?` can never leave the boundary open.

use crate::error::Error;
use crate::service::RemoteService;

/// An open transaction on the service. Commit it explicitly; dropping it
/// uncommitted rolls it back.
pub struct Transaction<'a> {
    service: &'a dyn RemoteService,
    done: bool,
}

impl<'a> Transaction<'a> {
    pub fn begin(service: &'a dyn RemoteService) -> Result<Transaction<'a>, Error> {
        service
            .begin_transaction()
            .map_err(|e| Error::remote("beginTransaction", e))?;
        tracing::debug!("transaction begun");
        Ok(Transaction {
            service,
            done: false,
        })
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.done = true;
        self.service
            .end_transaction(true)
            .map_err(|e| Error::remote("endTransaction", e))
    }

    pub fn rollback(mut self) -> Result<(), Error> {
        self.done = true;
        self.service
            .end_transaction(false)
            .map_err(|e| Error::remote("endTransaction", e))
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            // rollback on the unwind path; the original error stays primary
            if let Err(e) = self.service.end_transaction(false) {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err` while
/// propagating the original error.
pub fn with_transaction<T>(
    service: &dyn RemoteService,
    f: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    let tx = Transaction::begin(service)?;
    let value = f()?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryService;
    use crate::service::RemoteError;

    #[test]
    fn commit_on_success() {
        let service = InMemoryService::new();
        let result = with_transaction(&service, || Ok(7));
        assert_eq!(result.unwrap(), 7);
        assert_eq!(
            service.calls(),
            vec!["beginTransaction", "commitTransaction"]
        );
    }

    #[test]
    fn rollback_on_error_propagates_original() {
        let service = InMemoryService::new();
        let result: Result<(), Error> = with_transaction(&service, || {
            Err(Error::remote("updateTestRun", RemoteError::Fault("boom".into())))
        });
        match result.unwrap_err() {
            Error::Remote { operation, .. } => assert_eq!(operation, "updateTestRun"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            service.calls(),
            vec!["beginTransaction", "rollbackTransaction"]
        );
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let service = InMemoryService::new();
        {
            let _tx = Transaction::begin(&service).unwrap();
        }
        assert_eq!(
            service.calls(),
            vec!["beginTransaction", "rollbackTransaction"]
        );
    }
}
