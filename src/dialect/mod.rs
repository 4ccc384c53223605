pub mod json_envelope;
pub mod query_xml;
pub mod xml;
