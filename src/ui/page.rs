//! Embedded index page

use rust_embed::RustEmbed;
use std::net::SocketAddr;

use crate::constants::LOG_ENDPOINT;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

const INDEX: &str = "index.html";

/// Render the index page so its script connects back to `addr`.
///
/// For a wildcard bind address the page uses whatever host the browser
/// loaded it from.
pub fn render_index(addr: SocketAddr) -> crate::Result<String> {
    let file = Assets::get(INDEX)
        .ok_or_else(|| crate::Error::Config(format!("embedded asset {} missing", INDEX)))?;
    let template = String::from_utf8_lossy(&file.data);

    let host = if addr.ip().is_unspecified() {
        String::new()
    } else {
        addr.to_string()
    };

    Ok(template
        .replace("{{ host }}", &host)
        .replace("{{ path }}", LOG_ENDPOINT))
}
