//! Enumeration catalog validation.

use crate::error::Error;
use crate::service::RemoteService;

/// Validates candidate values against the service's enumeration catalogs.
///
/// Some catalogs exist per project; the optional scope parameter selects the
/// right catalog variant and is threaded through to the service untouched.
pub struct EnumResolver<'a> {
    service: &'a dyn RemoteService,
}

impl<'a> EnumResolver<'a> {
    pub fn new(service: &'a dyn RemoteService) -> EnumResolver<'a> {
        EnumResolver { service }
    }

    /// Confirm that `value` is a member of the named catalog. Comparison is
    /// case-sensitive; the catalog is authoritative.
    pub fn validate(
        &self,
        catalog: &str,
        scope: Option<&str>,
        field: &str,
        value: &str,
    ) -> Result<(), Error> {
        let options = self
            .service
            .enum_options(catalog, scope)
            .map_err(|e| Error::remote("getEnumOptions", e))?;
        if options.iter().any(|option| option == value) {
            Ok(())
        } else {
            Err(Error::invalid_value(field, value))
        }
    }
}
