// =============================================================================
// API Module
// =============================================================================
//
// - Bearer-token extractor
// - REST router

pub mod auth;
pub mod rest;
