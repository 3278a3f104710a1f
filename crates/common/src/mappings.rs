//! Ontology mappings between warehouse type strings and the biolink
//! vocabulary rendered in graph payloads, plus the entity-type color palette.

pub const BIOLINK_FALLBACK: &str = "biolink:NamedThing";
pub const PREDICATE_FALLBACK: &str = "biolink:related_to";
pub const COLOR_FALLBACK: &str = "#95A5A6";

/// Biolink class for an entity type string from the warehouse
pub fn biolink_class(raw_type: Option<&str>) -> &'static str {
    let Some(raw) = raw_type else {
        return BIOLINK_FALLBACK;
    };
    match raw.to_ascii_lowercase().as_str() {
        "gene" => "biolink:Gene",
        "disease" => "biolink:DiseaseOrPhenotypicFeature",
        "drug" => "biolink:Drug",
        "pathway" => "biolink:Pathway",
        "protein" => "biolink:Protein",
        _ => BIOLINK_FALLBACK,
    }
}

/// Biolink predicate for a relationship type string
pub fn predicate_for(relation_type: Option<&str>) -> &'static str {
    let Some(raw) = relation_type else {
        return PREDICATE_FALLBACK;
    };
    match raw.to_ascii_lowercase().as_str() {
        "gene_disease" => "biolink:gene_associated_with_condition",
        "drug_gene" => "biolink:affects",
        "drug_disease" => "biolink:treats",
        "gene_gene" => "biolink:genetically_interacts_with",
        "disease_disease" => "biolink:related_to",
        _ => PREDICATE_FALLBACK,
    }
}

/// Display color for an entity type string
pub fn color_for(raw_type: Option<&str>) -> &'static str {
    let Some(raw) = raw_type else {
        return COLOR_FALLBACK;
    };
    match raw.to_ascii_lowercase().as_str() {
        "gene" => "#4A90D9",
        "disease" => "#E74C3C",
        "drug" => "#2ECC71",
        "pathway" => "#F39C12",
        "protein" => "#9B59B6",
        _ => COLOR_FALLBACK,
    }
}

/// Derive a human-readable label from a biolink predicate:
/// strip the prefix, underscores become spaces.
pub fn label_from_predicate(predicate: &str) -> String {
    predicate.replace("biolink:", "").replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biolink_class() {
        assert_eq!(biolink_class(Some("gene")), "biolink:Gene");
        assert_eq!(biolink_class(Some("GENE")), "biolink:Gene");
        assert_eq!(biolink_class(Some("metabolite")), BIOLINK_FALLBACK);
        assert_eq!(biolink_class(None), BIOLINK_FALLBACK);
    }

    #[test]
    fn test_predicate_mapping() {
        assert_eq!(predicate_for(Some("gene_disease")), "biolink:gene_associated_with_condition");
        assert_eq!(predicate_for(Some("unknown_kind")), PREDICATE_FALLBACK);
    }

    #[test]
    fn test_label_from_predicate() {
        assert_eq!(label_from_predicate("biolink:gene_associated_with_condition"),
                   "gene associated with condition");
        assert_eq!(label_from_predicate("biolink:treats"), "treats");
    }
}
