use super::{PageContext, PartialRecord};
use crate::parser::page::image_sources;

/// Shorter sources are icons, spacers and tracking pixels.
const MIN_IMAGE_SRC_CHARS: usize = 20;

pub fn apply(ctx: &PageContext<'_>, mut rec: PartialRecord, _notes: &mut Vec<String>) -> PartialRecord {
    for src in image_sources(ctx.document) {
        if src.chars().count() > MIN_IMAGE_SRC_CHARS {
            rec.add_image(src);
        }
    }
    rec
}
