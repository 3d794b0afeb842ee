pub mod external_service;
pub mod identity;
pub mod permission;

pub use external_service::{
    ClientDTO, ExternalService, ExternalServiceRegistration, GrantType, KeyOption, KeyResult,
    OAuthClient,
};
pub use identity::{
    ManageServiceAccountCmd, ServiceAccountProfile, SignedInUser, Subject, Team, User,
};
pub use permission::{Permission, PermissionMap};
