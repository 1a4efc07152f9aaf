//! SeaORM entities for the campaign store.

pub mod audience;
pub mod audience_subscriber;
pub mod campaign;
pub mod campaign_audience;
pub mod click_event;
pub mod open_event;
pub mod profile;
pub mod send;
pub mod subscriber;
