use std::{
    fmt,
    io::{self, Write},
};

use bstr::ByteSlice;
use cqdb::CQDB;
use log::warn;

use crate::acrf::Acrf;
use crate::dictionary::Dictionary;
use crate::error::{CrfError, Result};
use crate::model_writer::{HEADER_SIZE, MAGIC, MODEL_TYPE, TEMPLATES_CHUNK, VERSION};
use crate::sparse::SparseVector;

#[inline]
pub(crate) fn unpack_u32(buf: &[u8]) -> io::Result<u32> {
    if buf.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking u32",
        ));
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[inline]
fn unpack_f64(buf: &[u8]) -> io::Result<f64> {
    if buf.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking f64",
        ));
    }
    Ok(f64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]))
}

/// Forward-only reader over a byte slice
struct Reader<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(buf: &'b [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn rest(&self) -> &'b [u8] {
        self.buf.get(self.pos..).unwrap_or(&[])
    }

    fn u32(&mut self) -> io::Result<u32> {
        let value = unpack_u32(self.rest())?;
        self.pos += 4;
        Ok(value)
    }

    fn f64(&mut self) -> io::Result<f64> {
        let value = unpack_f64(self.rest())?;
        self.pos += 8;
        Ok(value)
    }

    /// Number of records that follow, each at least `min_size` bytes long
    fn count(&mut self, what: &str, min_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        let left = self.rest().len();
        if count > left / min_size {
            return Err(CrfError::InvalidModel(format!(
                "{} {} records do not fit in the {} bytes left",
                count, what, left
            )));
        }
        Ok(count)
    }

    fn bytes(&mut self, len: usize) -> io::Result<&'b [u8]> {
        let rest = self.rest();
        if rest.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough data for unpacking bytes",
            ));
        }
        self.pos += len;
        Ok(&rest[..len])
    }
}

#[derive(Debug, Clone)]
struct Header {
    size: u32,
    version: u32,
    num_templates: u32,
    num_attrs: u32,
    off_templates: u32,
    off_attrs: u32,
}

/// Weights of one template as stored on disk, keyed by the feature ids of
/// the dictionary they were trained with
#[derive(Debug, Clone)]
pub struct SavedTemplate {
    name: String,
    weights: Vec<SparseVector>,
    default_weights: Vec<f64>,
}

impl SavedTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_assignments(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[SparseVector] {
        &self.weights
    }

    pub fn default_weights(&self) -> &[f64] {
        &self.default_weights
    }
}

/// A model file written by [`ModelWriter`](crate::ModelWriter)
#[derive(Clone)]
pub struct SavedModel<'a> {
    header: Header,
    templates: Vec<SavedTemplate>,
    attrs: CQDB<'a>,
}

impl<'a> fmt::Debug for SavedModel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedModel")
            .field("header", &self.header)
            .field("templates", &self.templates)
            .field("attrs", &self.attrs)
            .finish()
    }
}

impl<'a> SavedModel<'a> {
    /// Parse a model held in memory
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CrfError::InvalidModel("file too short".to_string()));
        }
        if &buf[0..4] != MAGIC {
            return Err(CrfError::InvalidModel(
                "invalid file format, magic mismatch".to_string(),
            ));
        }
        if &buf[8..12] != MODEL_TYPE {
            return Err(CrfError::InvalidModel(format!(
                "unknown model type {:?}",
                buf[8..12].as_bstr()
            )));
        }
        let mut reader = Reader::new(buf, 4);
        let size = reader.u32()?;
        reader.pos += 4;
        let header = Header {
            size,
            version: reader.u32()?,
            num_templates: reader.u32()?,
            num_attrs: reader.u32()?,
            off_templates: reader.u32()?,
            off_attrs: reader.u32()?,
        };
        if header.version != VERSION {
            return Err(CrfError::InvalidModel(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.size as usize != buf.len() {
            return Err(CrfError::InvalidModel(format!(
                "file size mismatch: header says {}, got {}",
                header.size,
                buf.len()
            )));
        }
        let templates = read_templates(buf, &header)?;
        let attrs_start = header.off_attrs as usize;
        if attrs_start >= buf.len() {
            return Err(CrfError::InvalidModel(
                "dictionary offset out of range".to_string(),
            ));
        }
        let attrs = CQDB::new(&buf[attrs_start..])?;
        Ok(Self {
            header,
            templates,
            attrs,
        })
    }

    pub fn num_templates(&self) -> usize {
        self.templates.len()
    }

    pub fn num_attrs(&self) -> u32 {
        self.header.num_attrs
    }

    pub fn templates(&self) -> &[SavedTemplate] {
        &self.templates
    }

    pub fn template(&self, name: &str) -> Option<&SavedTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Convert a stored feature id to its attribute name
    pub fn to_attr(&self, aid: u32) -> Option<&str> {
        self.attrs.to_str(aid).and_then(|s| s.to_str().ok())
    }

    /// Convert an attribute name to its stored feature id
    pub fn to_attr_id(&self, value: &str) -> Option<u32> {
        self.attrs.to_id(value)
    }

    /// Feature id under `attrs` of stored id `aid`.
    ///
    /// Ids the stored dictionary or `attrs` cannot resolve are kept as is.
    fn remap(&self, aid: u32, attrs: &Dictionary) -> u32 {
        self.to_attr(aid)
            .and_then(|name| attrs.get(name))
            .unwrap_or(aid)
    }

    /// Copy the stored weights into the templates of `acrf` with the same
    /// name, translating feature ids into `attrs`.
    ///
    /// Returns the number of templates restored.
    pub fn restore_into(&self, acrf: &mut Acrf, attrs: &Dictionary) -> Result<usize> {
        let mut restored = 0;
        for template in acrf.templates_mut() {
            let saved = match self.template(template.name()) {
                Some(saved) => saved,
                None => {
                    warn!("no stored weights for template {}", template.name());
                    continue;
                }
            };
            let weights = saved
                .weights
                .iter()
                .map(|w| self.remap_vector(w, attrs))
                .collect();
            let name = template.name().to_string();
            let target = template.weights_mut();
            target.set_weights(&name, weights)?;
            target
                .default_weights_mut()
                .copy_from_slice(&saved.default_weights);
            restored += 1;
        }
        for saved in &self.templates {
            if !acrf.templates().iter().any(|t| t.name() == saved.name) {
                warn!("stored template {} is not part of the model", saved.name);
            }
        }
        if attrs.len() > acrf.num_features() {
            acrf.set_num_features(attrs.len());
        }
        Ok(restored)
    }

    fn remap_vector(&self, stored: &SparseVector, attrs: &Dictionary) -> SparseVector {
        if !stored.is_dense() {
            return SparseVector::from_pairs(stored.iter().map(|(idx, v)| (self.remap(idx, attrs), v)));
        }
        let mut dense = SparseVector::dense(stored.num_locations());
        for (idx, value) in stored.iter() {
            let target = self.remap(idx, attrs);
            match dense.location(target) {
                Some(loc) => dense.values_mut()[loc] = value,
                None => warn!(
                    "dropping weight of feature {} outside the dense range {}",
                    target,
                    stored.num_locations()
                ),
            }
        }
        dense
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header = &self.header;
        writeln!(w, "FILEHEADER = {{")?;
        writeln!(w, "  magic: {}", MAGIC.as_bstr())?;
        writeln!(w, "  size: {}", header.size)?;
        writeln!(w, "  type: {}", MODEL_TYPE.as_bstr())?;
        writeln!(w, "  version: {}", header.version)?;
        writeln!(w, "  num_templates: {}", header.num_templates)?;
        writeln!(w, "  num_attrs: {}", header.num_attrs)?;
        writeln!(w, "  off_templates: {:#X}", header.off_templates)?;
        writeln!(w, "  off_attrs: {:#X}", header.off_attrs)?;
        writeln!(w, "}}\n")?;

        writeln!(w, "ATTRIBUTES = {{")?;
        for i in 0..header.num_attrs {
            writeln!(w, "  {:>5}: {}", i, self.to_attr(i).unwrap_or("?"))?;
        }
        writeln!(w, "}}\n")?;

        for template in &self.templates {
            writeln!(w, "TEMPLATE {} = {{", template.name)?;
            for (a, (weights, default)) in template
                .weights
                .iter()
                .zip(&template.default_weights)
                .enumerate()
            {
                writeln!(w, "  [{}] default: {:.6}", a, default)?;
                for (idx, value) in weights.iter().filter(|&(_, v)| v != 0.0) {
                    match self.to_attr(idx) {
                        Some(attr) => writeln!(w, "  [{}] {}: {:.6}", a, attr, value)?,
                        None => writeln!(w, "  [{}] #{}: {:.6}", a, idx, value)?,
                    }
                }
            }
            writeln!(w, "}}\n")?;
        }
        Ok(())
    }
}

fn read_templates(buf: &[u8], header: &Header) -> Result<Vec<SavedTemplate>> {
    let mut reader = Reader::new(buf, header.off_templates as usize);
    if reader.bytes(4)? != TEMPLATES_CHUNK {
        return Err(CrfError::InvalidModel(
            "template chunk tag mismatch".to_string(),
        ));
    }
    let _chunk_size = reader.u32()?;
    // name length and assignment count
    let num_templates = reader.count("template", 8)?;
    if num_templates != header.num_templates as usize {
        return Err(CrfError::InvalidModel(format!(
            "header lists {} templates, chunk holds {}",
            header.num_templates, num_templates
        )));
    }

    let mut templates = Vec::with_capacity(num_templates);
    for _ in 0..num_templates {
        let name_len = reader.u32()? as usize;
        let name = reader
            .bytes(name_len)?
            .to_str()
            .map_err(|_| CrfError::InvalidModel("template name is not UTF-8".to_string()))?
            .to_string();
        // default weight, dense flag and location count
        let num_assignments = reader.count("assignment", 16)?;
        let mut weights = Vec::with_capacity(num_assignments);
        let mut default_weights = Vec::with_capacity(num_assignments);
        for _ in 0..num_assignments {
            default_weights.push(reader.f64()?);
            let dense = reader.u32()? != 0;
            let num_locations = reader.count("weight", 12)?;
            let mut pairs = Vec::with_capacity(num_locations);
            for _ in 0..num_locations {
                let idx = reader.u32()?;
                pairs.push((idx, reader.f64()?));
            }
            let vector = if dense {
                let mut vector = SparseVector::dense(num_locations);
                for (idx, value) in pairs {
                    let loc = vector.location(idx).ok_or_else(|| {
                        CrfError::InvalidModel(format!(
                            "dense weight index {} out of range in {}",
                            idx, name
                        ))
                    })?;
                    vector.values_mut()[loc] = value;
                }
                vector
            } else {
                SparseVector::from_pairs(pairs)
            };
            weights.push(vector);
        }
        templates.push(SavedTemplate {
            name,
            weights,
            default_weights,
        });
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model() {
        assert!(SavedModel::new(b"").is_err());

        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(b"LCRF");
        let err = SavedModel::new(&buf).unwrap_err();
        assert!(err.to_string().contains("magic mismatch"));

        buf[0..4].copy_from_slice(MAGIC);
        buf[8..12].copy_from_slice(b"FOMC");
        assert!(SavedModel::new(&buf).is_err());
    }

    #[test]
    fn test_reader_bounds() {
        let buf = [1u8, 0, 0, 0, 2];
        let mut reader = Reader::new(&buf, 0);
        assert_eq!(reader.u32().unwrap(), 1);
        assert!(reader.u32().is_err());
        assert!(reader.bytes(2).is_err());
        assert_eq!(reader.bytes(1).unwrap(), &[2]);
    }

    #[test]
    fn test_counts_must_fit_the_data() {
        let mut buf = 2u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 24]);
        assert_eq!(Reader::new(&buf, 0).count("weight", 12).unwrap(), 2);
        assert!(matches!(
            Reader::new(&buf, 0).count("assignment", 16),
            Err(CrfError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_corrupt_assignment_count() {
        let mut chunk = TEMPLATES_CHUNK.to_vec();
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&1u32.to_le_bytes());
        chunk.extend_from_slice(&1u32.to_le_bytes());
        chunk.push(b'u');
        chunk.extend_from_slice(&u32::MAX.to_le_bytes());
        let header = Header {
            size: chunk.len() as u32,
            version: VERSION,
            num_templates: 1,
            num_attrs: 0,
            off_templates: 0,
            off_attrs: 0,
        };
        let err = read_templates(&chunk, &header).unwrap_err();
        assert!(err.to_string().contains("assignment records do not fit"), "{}", err);
    }
}
