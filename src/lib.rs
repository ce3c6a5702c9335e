// scribe: Workspace root.
//
// The agent binary lives in services/agent; shared libraries under
// crates/.  This root crate exists to host the cross-component integration
// suite in tests/integration/, which drives the agent against the mock
// collector from scribe-test-utils.
