pub mod decoder;
pub mod fetch;
pub mod geometry;
pub mod polyline;
pub mod report;
pub mod schedule;
pub mod validator;

pub mod protos {
    include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
}

pub use protos::gtfs_realtime as gtfs_rt;
