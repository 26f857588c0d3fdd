//! Report rendering.

pub mod generator;

pub use generator::{
    email_subject, generate_html_report, generate_json_report, generate_markdown_report,
    generate_text_report, write_report,
};
