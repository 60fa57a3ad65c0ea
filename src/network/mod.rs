pub mod session_table;
pub mod ws_server;
