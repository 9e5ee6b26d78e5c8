pub mod bridge;
pub mod clock;
pub mod config;
pub mod css_capture;
pub mod editor;
pub mod error;
pub mod export;
pub mod html;
pub mod ids;
pub mod installed;
pub mod links;
pub mod model;
pub mod preview;
pub mod saved;
pub mod scripts;
pub mod session;

/// Prefix carried by generated page ids and stripped during link matching.
pub const PAGE_ID_PREFIX: &str = "page-";
/// Class put on every page container in the exported document.
pub const PAGE_MARKER_CLASS: &str = "sc-page";
/// Fixed class the editor's root element is expressed with outside the editor.
pub const WRAPPER_CLASS: &str = "sc-wrapper";
/// Element id of the embedded `Page[]` JSON payload.
pub const PAYLOAD_ELEMENT_ID: &str = "sc-pages-data";
/// Element id of the empty container the runtime renders pages into.
pub const ROOT_ELEMENT_ID: &str = "sc-root";
/// Attribute carrying an internal page link target.
pub const PAGE_LINK_ATTR: &str = "data-page-link";
/// Content given to freshly added pages.
pub const PLACEHOLDER_HTML: &str = "<div class=\"sc-drop-placeholder\" style=\"min-height:240px;display:flex;align-items:center;justify-content:center;border:2px dashed #9aa4b2;color:#5b6472;font:16px sans-serif;\">Drop a widget here</div>";
