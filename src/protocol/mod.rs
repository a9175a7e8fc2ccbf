//! Protocol module for tds-credential-proxy
//!
//! Only SQL Server's Tabular Data Stream is spoken here; see [`sqlserver`].

pub mod sqlserver;
