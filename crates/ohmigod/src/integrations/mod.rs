pub mod ohmonwifi;
