use clr_rewriter::exclusion::{
    ExclusionFilter, AGENT_ASSEMBLY, CORE_ASSEMBLY, DEFAULT_EXCLUDED_ASSEMBLIES, EMIT_ASSEMBLY,
};

#[test]
fn default_filter_rejects_every_listed_assembly() {
    let filter = ExclusionFilter::default();
    for assembly in DEFAULT_EXCLUDED_ASSEMBLIES {
        assert!(filter.is_excluded(assembly), "{assembly} should be excluded");
    }
    assert!(filter.is_excluded(AGENT_ASSEMBLY));
    assert!(filter.is_excluded(CORE_ASSEMBLY));
    assert!(filter.is_excluded(EMIT_ASSEMBLY));
    assert!(filter.is_excluded("mscorlib"));
}

#[test]
fn default_filter_admits_everything_else() {
    let filter = ExclusionFilter::default();
    for assembly in ["Shop", "System", "System.Linq", "ClrRewriter.Samples", "MSCORLIB", "mscorlib.dll", ""] {
        assert!(!filter.is_excluded(assembly), "{assembly} should be admitted");
    }
}

#[test]
fn custom_filter_uses_only_its_own_list() {
    let filter = ExclusionFilter::new(["Vendor.Sdk", "Vendor.Sdk.Native"]);
    assert!(filter.is_excluded("Vendor.Sdk"));
    assert!(filter.is_excluded("Vendor.Sdk.Native"));
    assert!(!filter.is_excluded("mscorlib"));
    assert_eq!(filter.assemblies().collect::<Vec<_>>(), vec!["Vendor.Sdk", "Vendor.Sdk.Native"]);
}
