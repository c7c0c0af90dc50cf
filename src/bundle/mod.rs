pub mod archive;
pub mod class_list;
pub mod icon;
pub mod manifest;

pub use archive::{extract_zip, md5_hex, zip_with_md5};
pub use class_list::load_class_names;
pub use icon::{icon_preview_data_url, write_bundle_icon, ICON_SIZE};
pub use manifest::{write_pretty_json, ConfDocument, DescDocument, DetectionThreshold};
