use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use cqdb::CQDBWriter;
use log::info;

use crate::acrf::Acrf;
use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::template::TemplateWeights;

pub(crate) const MAGIC: &[u8; 4] = b"ACRF";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"TMPL";
pub(crate) const TEMPLATES_CHUNK: &[u8; 4] = b"TWTS";
pub(crate) const VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 32;

/// Write the weights of a trained model to file
pub struct ModelWriter;

impl ModelWriter {
    /// Write the trainable templates of `acrf` and the feature dictionary
    /// `attrs` that names their feature ids.
    ///
    /// Layout: a fixed header, one chunk with every template's weights, and
    /// the dictionary as a CQDB.
    pub fn write(filename: &Path, acrf: &Acrf, attrs: &Dictionary) -> Result<()> {
        let mut file = File::create(filename)?;
        let num_templates = to_u32(acrf.templates().len(), "number of templates")?;
        let num_attrs = to_u32(attrs.len(), "number of attributes")?;

        // Placeholder header, rewritten once the offsets are known
        Self::write_header(&mut file, 0, num_templates, num_attrs, 0, 0)?;

        let off_templates = to_u32(file.stream_position()?, "template chunk offset")?;
        Self::write_templates(&mut file, acrf)?;

        let off_attrs = to_u32(file.stream_position()?, "dictionary offset")?;
        Self::write_cqdb(&mut file, attrs)?;

        let file_size = to_u32(file.seek(SeekFrom::End(0))?, "file size")?;
        file.seek(SeekFrom::Start(0))?;
        Self::write_header(
            &mut file,
            file_size,
            num_templates,
            num_attrs,
            off_templates,
            off_attrs,
        )?;
        file.flush()?;
        info!(
            "wrote {} templates and {} attributes to {}",
            num_templates,
            num_attrs,
            filename.display()
        );
        Ok(())
    }

    fn write_header(
        file: &mut File,
        size: u32,
        num_templates: u32,
        num_attrs: u32,
        off_templates: u32,
        off_attrs: u32,
    ) -> io::Result<()> {
        file.write_all(MAGIC)?;
        file.write_all(&size.to_le_bytes())?;
        file.write_all(MODEL_TYPE)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&num_templates.to_le_bytes())?;
        file.write_all(&num_attrs.to_le_bytes())?;
        file.write_all(&off_templates.to_le_bytes())?;
        file.write_all(&off_attrs.to_le_bytes())?;
        Ok(())
    }

    /// Template chunk: tag, chunk size, count, then one record per template
    fn write_templates(file: &mut File, acrf: &Acrf) -> io::Result<()> {
        let mut body = Vec::new();
        for template in acrf.templates() {
            encode_template(&mut body, template.name(), template.weights())?;
        }
        let num_templates = to_u32(acrf.templates().len(), "number of templates")?;
        let chunk_size = to_u32(12 + body.len(), "template chunk size")?;
        file.write_all(TEMPLATES_CHUNK)?;
        file.write_all(&chunk_size.to_le_bytes())?;
        file.write_all(&num_templates.to_le_bytes())?;
        file.write_all(&body)?;
        Ok(())
    }

    /// Write CQDB dictionary
    fn write_cqdb(file: &mut File, dict: &Dictionary) -> io::Result<()> {
        let mut writer = CQDBWriter::new(file)?;
        for (s, id) in dict.iter() {
            writer.put(s, id)?;
        }
        // the database is finalized when the writer drops
        Ok(())
    }
}

/// One template record:
///
/// ```text
/// name length, name bytes, number of assignments
/// per assignment: default weight, dense flag, number of locations,
///                 (feature id, weight) per location
/// ```
fn encode_template(buf: &mut Vec<u8>, name: &str, weights: &TemplateWeights) -> io::Result<()> {
    buf.extend_from_slice(&to_u32(name.len(), "template name length")?.to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&to_u32(weights.num_assignments(), "number of assignments")?.to_le_bytes());
    for (w, &default) in weights.weights().iter().zip(weights.default_weights()) {
        buf.extend_from_slice(&default.to_le_bytes());
        buf.extend_from_slice(&u32::from(w.is_dense()).to_le_bytes());
        buf.extend_from_slice(&to_u32(w.num_locations(), "number of locations")?.to_le_bytes());
        for (idx, value) in w.iter() {
            buf.extend_from_slice(&idx.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}

fn to_u32<T: TryInto<u32>>(value: T, what: &str) -> io::Result<u32> {
    value.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} exceeds u32::MAX", what),
        )
    })
}
