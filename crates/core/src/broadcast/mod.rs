pub mod broadcast_channel;
