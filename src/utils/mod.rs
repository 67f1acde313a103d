pub mod net;
pub mod sos;
