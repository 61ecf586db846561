/// Collapses node labels that start with a known prefix into that prefix,
/// so that, say, every `nsGenericElement (xhtml) span` is grouped together
/// no matter its attributes.
///
/// The longest matching prefix wins. Equal-length prefixes are tried in
/// lexicographic order.
#[derive(Clone, Debug, Default)]
pub struct LabelCanonicalizer {
    prefixes: Vec<String>,
}

impl LabelCanonicalizer {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes.dedup();
        LabelCanonicalizer { prefixes }
    }

    /// The prefixes the census tools group DOM and JS objects by
    pub fn dom_defaults() -> Self {
        Self::new([
            "nsGenericElement (XUL)",
            "nsGenericElement (xhtml) span ",
            "nsGenericElement (xhtml) a ",
            "nsGenericElement (xhtml) input ",
            "nsGenericElement (XBL)",
            "nsGenericDOMDataNode",
            "nsNodeInfo (XUL)",
            "nsNodeInfo (xhtml)",
            "nsNodeInfo (XBL)",
            "JS Object",
            "nsXPCWrappedJS",
            "XPCWrappedNative",
            "nsDocument",
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn canonicalize<'a>(&'a self, label: &'a str) -> &'a str {
        self.prefixes
            .iter()
            .find(|p| label.starts_with(p.as_str()))
            .map_or(label, String::as_str)
    }
}
