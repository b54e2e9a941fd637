pub mod reflector_server;
pub mod services;
