use crate::client::Client;
use crate::descriptor::{EntityDescriptor, FieldMapping, MappingTable};
use crate::error::Error;
use crate::marshal::{self, EntityState};
use crate::service::Channel;
use remora_wire::{ObjectUri, WireStruct};

pub static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    type_id: "User",
    channel: Channel::Tracker,
    id_field: Some("user_id"),
    fields: &[
        ("user_id", FieldMapping::Scalar { remote: "id" }),
        ("name", FieldMapping::Scalar { remote: "name" }),
    ],
};

/// A service account.
#[derive(Debug, Clone)]
pub struct User {
    table: MappingTable,
    state: EntityState,
}

impl User {
    pub fn by_id(client: &Client, user_id: &str) -> Result<User, Error> {
        let body = marshal::lookup_by_id(client.service(), &DESCRIPTOR, None, user_id)?;
        Ok(User::adopt(body))
    }

    pub fn by_uri(client: &Client, uri: &ObjectUri) -> Result<User, Error> {
        let body = marshal::lookup_by_uri(client.service(), &DESCRIPTOR, uri)?;
        Ok(User::adopt(body))
    }

    pub(crate) fn adopt(body: WireStruct) -> User {
        User {
            table: MappingTable::of(&DESCRIPTOR),
            state: EntityState::adopt(body),
        }
    }

    pub fn uri(&self) -> Option<ObjectUri> {
        self.state.uri()
    }

    pub(crate) fn require_uri(&self) -> Result<ObjectUri, Error> {
        self.state.require_uri(DESCRIPTOR.type_id)
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.str_field(&self.table, "user_id")
    }

    pub fn name(&self) -> Option<String> {
        self.state.str_field(&self.table, "name")
    }
}
