//! Linker: merges assembled objects, resolves global relocations against
//! the combined symbol table, and reports duplicate or unresolved symbols.
//!
//! Grounded on `link/linker.py`: `append_object` concatenates an object's
//! words onto the running image and shifts its relocations' word indices by
//! the image's current length; `link` then walks every relocation and
//! patches it in place, failing loudly (never silently) on a symbol that is
//! multiply defined or never defined at all.

use crate::asm::{Object, RelocKind};
use std::collections::HashMap;

pub struct LinkError {
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Image {
    pub words: Vec<u16>,
    symbols: HashMap<String, usize>,
    pending: Vec<(usize, String)>,
}

impl Image {
    pub fn new() -> Self {
        Image::default()
    }

    /// Appends `obj`'s words to the image, shifting its local symbol
    /// offsets and relocation targets by the image's current length so
    /// later objects never see stale, zero-based indices.
    pub fn append_object(&mut self, obj: &Object) -> Result<(), LinkError> {
        let base = self.words.len();
        for (name, &offset) in &obj.symbols {
            if self.symbols.contains_key(name) {
                return Err(LinkError { message: format!("duplicate symbol '{}'", name) });
            }
            self.symbols.insert(name.clone(), base + offset);
        }
        for reloc in &obj.relocations {
            if let RelocKind::Global = reloc.kind {
                self.pending.push((base + reloc.word_index, reloc.symbol.clone()));
            }
        }
        self.words.extend_from_slice(&obj.words);
        Ok(())
    }

    /// Resolves every pending relocation against the combined symbol table,
    /// patching the corresponding word in place. Any symbol left unresolved
    /// is reported as a single aggregated error, matching `link/linker.py`'s
    /// "collect every missing symbol, then fail once" behavior rather than
    /// stopping at the first one.
    pub fn link(mut self) -> Result<Vec<u16>, LinkError> {
        let mut missing = Vec::new();
        for (word_index, symbol) in &self.pending {
            match self.symbols.get(symbol) {
                Some(&addr) => self.words[*word_index] = addr as u16,
                None => missing.push(symbol.clone()),
            }
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(LinkError { message: format!("undefined symbol(s): {}", missing.join(", ")) });
        }
        Ok(self.words)
    }
}

pub fn link_objects(objects: &[Object]) -> Result<Vec<u16>, LinkError> {
    let mut image = Image::new();
    for obj in objects {
        image.append_object(obj)?;
    }
    image.link()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Relocation;

    fn obj_with_symbol(name: &str, words: Vec<u16>) -> Object {
        let mut o = Object::default();
        o.words = words;
        o.symbols.insert(name.to_string(), 0);
        o
    }

    #[test]
    fn links_two_objects_with_a_cross_reference() {
        let mut caller = Object::default();
        caller.words = vec![0, 0];
        caller.relocations.push(Relocation { word_index: 1, symbol: "callee".to_string(), kind: RelocKind::Global });
        let callee = obj_with_symbol("callee", vec![9]);

        let image = link_objects(&[caller, callee]).unwrap();
        assert_eq!(image[1], 2); // callee lands right after caller's 2 words.
    }

    #[test]
    fn duplicate_symbol_is_an_error() {
        let a = obj_with_symbol("main", vec![1]);
        let b = obj_with_symbol("main", vec![2]);
        assert!(link_objects(&[a, b]).is_err());
    }

    #[test]
    fn unresolved_symbol_is_an_error() {
        let mut caller = Object::default();
        caller.words = vec![0];
        caller.relocations.push(Relocation { word_index: 0, symbol: "ghost".to_string(), kind: RelocKind::Global });
        assert!(link_objects(&[caller]).is_err());
    }
}
