//! `policystream-identity`: people and the user accounts that reference them.
//!
//! A `Person` is the insured party or staff member; a `User` is a login that
//! may be linked to one person. The user directory read model denormalises
//! the linked person's name, which is why both aggregates live together here.

pub mod person;
pub mod user;

pub use person::{
    Person, PersonCommand, PersonEvent, PersonEventKind, PersonId, PersonRegistered, PersonRenamed,
    RegisterPerson, RenamePerson,
};
pub use user::{
    AssignRole, ChangeLoginEmail, CreateUser, DeactivateUser, LinkPerson, LoginEmailChanged,
    PersonLinked, RevokeRole, RoleAssigned, RoleRevoked, User, UserCommand, UserCreated,
    UserDeactivated, UserEvent, UserEventKind, UserStatus,
};
