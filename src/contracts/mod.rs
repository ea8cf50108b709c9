pub mod command_request_v1;
