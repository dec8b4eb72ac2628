mod client;
mod multistatus;

pub use client::{ClientConfig, DavClient, DavError, ErrorClass};
pub use multistatus::{DavResponse, Depth, Prop, PropMap, parse_multistatus};
pub use reqwest::{Method, StatusCode};
