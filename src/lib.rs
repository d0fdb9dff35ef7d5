#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;

pub mod catchers;
pub mod configuration;
pub mod db;
pub mod domain;
pub mod email;
pub mod guards;
pub mod liftoff;
pub mod models;
pub mod reminders;
pub mod routes;
pub mod schema;
pub mod startup;
pub mod telemetry;
