//! Host helpers used by integrations
//!
//! - [`oauth2`]: authorization-code flow and token refresh
//! - [`update_coordinator`]: interval polling shared by an entry's entities
//! - [`entity`]: sensor entities and the platform that writes their state
//! - [`hass`]: handle on the running host

pub mod entity;
pub mod hass;
pub mod oauth2;
pub mod update_coordinator;

pub use entity::{render_state, DeviceInfo, EntityPlatform, SensorDeviceClass, SensorEntity, SENSOR_DOMAIN};
pub use hass::{Hass, SharedHass, StaticPathConfig, AUTH_CALLBACK_PATH};
pub use oauth2::{
    AuthorizationServer, ClientCredential, LocalOAuth2Implementation, OAuth2Error, OAuth2Session,
    OAuth2Token, TokenUpdateCallback,
};
pub use update_coordinator::{DataUpdateCoordinator, ListenerId, UpdateFailed, REQUEST_REFRESH_COOLDOWN};
