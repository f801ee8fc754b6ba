//! Integration tests for the network layer, driven through mock collaborators
