#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use crate::engine::{
        rewrite_document, IdTranslator, PackageRef, ParseEvent, TranslateFault, XmlCursor,
    };
    use crate::layout::{TypedValue, TYPE_INT_DEC, TYPE_INT_HEX, TYPE_REFERENCE};
    use crate::mem::{Document, DocumentBuilder};

    const ORIGINAL: PackageRef = PackageRef::new(0x10);
    const REPLACEMENT: PackageRef = PackageRef::new(0x20);

    fn reference(id: u32) -> TypedValue {
        TypedValue { data_type: TYPE_REFERENCE, data: id }
    }

    /// Translator backed by explicit maps, recording every invocation.
    /// Asking it about something unmapped is a test bug and faults loudly.
    struct MappingTranslator {
        attr_map: HashMap<String, u32>,
        res_map: HashMap<u32, u32>,
        attr_calls: RefCell<Vec<String>>,
        res_calls: RefCell<Vec<u32>>,
    }

    impl MappingTranslator {
        fn new() -> MappingTranslator {
            MappingTranslator {
                attr_map: HashMap::new(),
                res_map: HashMap::new(),
                attr_calls: RefCell::new(Vec::new()),
                res_calls: RefCell::new(Vec::new()),
            }
        }

        fn map_attr(mut self, name: &str, id: u32) -> MappingTranslator {
            self.attr_map.insert(name.to_string(), id);
            self
        }

        fn map_res(mut self, old: u32, new: u32) -> MappingTranslator {
            self.res_map.insert(old, new);
            self
        }
    }

    impl IdTranslator for MappingTranslator {
        fn translate_attr_id(
            &self,
            name: &str,
            original: PackageRef,
        ) -> Result<u32, TranslateFault> {
            assert_eq!(original, ORIGINAL);
            self.attr_calls.borrow_mut().push(name.to_string());
            self.attr_map
                .get(name)
                .copied()
                .ok_or_else(|| TranslateFault::new(format!("unmapped attribute {name}")))
        }

        fn translate_res_id(
            &self,
            old_id: u32,
            original: PackageRef,
            replacement: PackageRef,
        ) -> Result<u32, TranslateFault> {
            assert_eq!(original, ORIGINAL);
            assert_eq!(replacement, REPLACEMENT);
            self.res_calls.borrow_mut().push(old_id);
            self.res_map
                .get(&old_id)
                .copied()
                .ok_or_else(|| TranslateFault::new(format!("unmapped resource {old_id:#010x}")))
        }
    }

    /// Faults on the first attribute-name translation, counting calls.
    struct FaultingTranslator {
        calls: RefCell<usize>,
    }

    impl IdTranslator for FaultingTranslator {
        fn translate_attr_id(&self, _: &str, _: PackageRef) -> Result<u32, TranslateFault> {
            *self.calls.borrow_mut() += 1;
            Err(TranslateFault::new("translation raised"))
        }

        fn translate_res_id(
            &self,
            _: u32,
            _: PackageRef,
            _: PackageRef,
        ) -> Result<u32, TranslateFault> {
            *self.calls.borrow_mut() += 1;
            Err(TranslateFault::new("translation raised"))
        }
    }

    #[test]
    fn app_owned_names_are_rewritten_and_platform_names_kept() {
        let mut builder = DocumentBuilder::new();
        builder
            .resource_attr("themedText", 0x7F01_0001)
            .resource_attr("platformText", 0x0101_0020)
            .start_element("TextView")
            .attribute("themedText", TypedValue { data_type: TYPE_INT_DEC, data: 1 })
            .attribute("platformText", TypedValue { data_type: TYPE_INT_DEC, data: 2 })
            .end_element("TextView");
        let mut doc = builder.to_document();

        let translator = MappingTranslator::new().map_attr("themedText", 0x7F01_0042);
        let stats = rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap();

        assert_eq!(doc.resource_id(0), Some(0x7F01_0042));
        assert_eq!(doc.resource_id(1), Some(0x0101_0020));
        assert_eq!(translator.attr_calls.borrow().as_slice(), ["themedText"]);
        assert_eq!(stats.names_rewritten, 1);
        assert_eq!(stats.values_rewritten, 0);
    }

    #[test]
    fn reference_values_are_rewritten_and_non_reference_values_immune() {
        let mut builder = DocumentBuilder::new();
        builder
            .start_element("ImageView")
            .attribute("src", reference(0x7F02_0010))
            // App-range payload but not a reference: must never be touched.
            .attribute("magic", TypedValue { data_type: TYPE_INT_HEX, data: 0x7F99_9999 })
            .end_element("ImageView");
        let mut doc = builder.to_document();

        let translator = MappingTranslator::new().map_res(0x7F02_0010, 0x7F02_0011);
        let stats = rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap();

        assert_eq!(doc.next(), ParseEvent::StartTag);
        assert_eq!(doc.attribute_value(0), Some(reference(0x7F02_0011)));
        assert_eq!(
            doc.attribute_value(1),
            Some(TypedValue { data_type: TYPE_INT_HEX, data: 0x7F99_9999 })
        );
        assert_eq!(translator.res_calls.borrow().as_slice(), [0x7F02_0010]);
        assert_eq!(stats.values_rewritten, 1);
    }

    #[test]
    fn rewriting_an_already_rewritten_tree_is_idempotent() {
        let mut builder = DocumentBuilder::new();
        builder
            .resource_attr("tint", 0x7F01_0003)
            .start_element("v")
            .attribute("tint", reference(0x7F03_0001))
            .end_element("v");
        let mut doc = builder.to_document();

        let first = MappingTranslator::new()
            .map_attr("tint", 0x7F01_0004)
            .map_res(0x7F03_0001, 0x7F03_0002);
        rewrite_document(&mut doc, &first, ORIGINAL, REPLACEMENT).unwrap();
        let after_first = doc.as_bytes().to_vec();

        // Identity pass over the rewritten tree: no further mutation.
        let identity = MappingTranslator::new()
            .map_attr("tint", 0x7F01_0004)
            .map_res(0x7F03_0002, 0x7F03_0002);
        let stats = rewrite_document(&mut doc, &identity, ORIGINAL, REPLACEMENT).unwrap();
        assert_eq!(doc.as_bytes(), after_first.as_slice());
        assert_eq!(stats.names_rewritten, 0);
        assert_eq!(stats.values_rewritten, 0);
    }

    #[test]
    fn cursor_is_restarted_after_successful_traversal() {
        let mut builder = DocumentBuilder::new();
        builder
            .start_element("a")
            .start_element("b")
            .end_element("b")
            .end_element("a");
        let mut doc = builder.to_document();

        rewrite_document(&mut doc, &MappingTranslator::new(), ORIGINAL, REPLACEMENT).unwrap();
        assert_eq!(doc.restart_count(), 1);
        // Back at the start: the first tag is observable again.
        assert_eq!(doc.next(), ParseEvent::StartTag);
    }

    #[test]
    fn tags_without_attributes_invoke_no_callbacks() {
        let mut builder = DocumentBuilder::new();
        builder.start_element("plain").end_element("plain");
        let mut doc = builder.to_document();

        let translator = MappingTranslator::new();
        let stats = rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap();
        assert!(translator.attr_calls.borrow().is_empty());
        assert!(translator.res_calls.borrow().is_empty());
        assert_eq!(stats.tags_visited, 1);
    }

    #[test]
    fn bad_document_stops_immediately_and_still_restarts() {
        let mut builder = DocumentBuilder::new();
        builder
            .resource_attr("text", 0x7F01_0001)
            .start_element("v")
            .attribute("text", reference(0x7F02_0001))
            .end_element("v");
        let mut bytes = builder.build();
        // Corrupt the first element chunk's declared size. The string pool
        // and resource map chunks precede it.
        let mut pos = 8usize;
        loop {
            let chunk_type = crate::layout::read_u16(&bytes, pos).unwrap();
            if chunk_type == crate::layout::RES_XML_START_ELEMENT_TYPE {
                bytes[pos + 4..pos + 8].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
                break;
            }
            pos += crate::layout::read_u32(&bytes, pos + 4).unwrap() as usize;
        }
        let mut doc = Document::from_bytes(bytes).unwrap();

        let translator = MappingTranslator::new();
        let stats = rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap();
        assert_eq!(stats.tags_visited, 0);
        assert!(translator.attr_calls.borrow().is_empty());
        assert!(translator.res_calls.borrow().is_empty());
        assert_eq!(doc.restart_count(), 1);
        assert_eq!(doc.resource_id(0), Some(0x7F01_0001));
    }

    #[test]
    fn single_tag_scenario_rewrites_name_and_spares_platform_reference() {
        let mut builder = DocumentBuilder::new();
        builder
            .resource_attr("styledAttr", 0x7F01_0001)
            .start_element("Widget")
            .attribute("styledAttr", TypedValue { data_type: TYPE_INT_DEC, data: 7 })
            // Reference below the app threshold: not a candidate.
            .attribute("plainAttr", reference(0x0101_0001))
            .end_element("Widget");
        let mut doc = builder.to_document();

        let translator = MappingTranslator::new().map_attr("styledAttr", 0x7F01_0002);
        rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap();

        assert_eq!(doc.resource_id(0), Some(0x7F01_0002));
        assert!(translator.res_calls.borrow().is_empty());
        assert_eq!(doc.next(), ParseEvent::StartTag);
        assert_eq!(doc.attribute_value(1), Some(reference(0x0101_0001)));
    }

    #[test]
    fn fault_on_first_attribute_aborts_with_one_restart() {
        let mut builder = DocumentBuilder::new();
        builder
            .resource_attr("first", 0x7F01_0001)
            .resource_attr("second", 0x7F01_0002)
            .start_element("v")
            .attribute("first", reference(0x7F04_0001))
            .attribute("second", reference(0x7F04_0002))
            .end_element("v");
        let mut doc = builder.to_document();

        let translator = FaultingTranslator { calls: RefCell::new(0) };
        let fault = rewrite_document(&mut doc, &translator, ORIGINAL, REPLACEMENT).unwrap_err();
        assert_eq!(fault.message(), "translation raised");
        // Nothing past the faulting callback was processed.
        assert_eq!(*translator.calls.borrow(), 1);
        assert_eq!(doc.restart_count(), 1);
        assert_eq!(doc.resource_id(0), Some(0x7F01_0001));
        assert_eq!(doc.resource_id(1), Some(0x7F01_0002));
        assert_eq!(doc.next(), ParseEvent::StartTag);
        assert_eq!(doc.attribute_value(0), Some(reference(0x7F04_0001)));
    }
}
