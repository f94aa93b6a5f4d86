mod keepalive;

pub use keepalive::{ChannelKeepalive, HeartbeatRound, SweepReport};
