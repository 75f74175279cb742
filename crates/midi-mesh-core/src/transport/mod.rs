pub mod reliable;
pub mod udp;
