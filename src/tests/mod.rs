// Test modules for the erniebot crate
//
// Each source module has a corresponding test file focused on business
// behaviour. Tests touching the network live in tests/ and run against
// wiremock servers.

// Shared stubs and fixtures
pub mod helpers;


pub mod http_client;
