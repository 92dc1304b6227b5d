pub mod channel;
pub mod loopback;

pub use channel::{
    ChannelGroup, CompletionStatus, Fabric, Notification, NotificationKind, Transfer,
};
pub use loopback::{LoopbackFabric, LoopbackSwitch, LossModel, SwitchStats};
