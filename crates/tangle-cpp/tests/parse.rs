use pretty_assertions::assert_eq;
use proptest::{
    prelude::*,
    test_runner::{Config, RngAlgorithm, TestRng, TestRunner},
};
use rstest::rstest;
use tangle_backend::pattern::{choice, sym};
use tangle_runtime::{Edit, Node, Tree};

fn parse(src: &str) -> Tree {
    tangle_cpp::parse(src.as_bytes()).unwrap()
}

fn find<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind_name() == kind {
        return Some(node);
    }
    node.children().find_map(|child| find(child, kind))
}

/// One line per node: depth, field, kind, range and flags.
fn dump(tree: &Tree) -> Vec<String> {
    fn walk(node: Node, depth: usize, out: &mut Vec<String>) {
        out.push(format!(
            "{:depth$}{}{} {:?}{}{}",
            "",
            node.field_name().map(|f| format!("{f}: ")).unwrap_or_default(),
            node.kind_name(),
            node.byte_range(),
            if node.is_error() { " error" } else { "" },
            if node.is_extra() { " extra" } else { "" },
        ));
        for child in node.children() {
            walk(child, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(tree.root_node(), 0, &mut out);
    out
}

fn top_level(tree: &Tree) -> Vec<&str> {
    tree.root_node().named_children().map(|n| n.kind_name()).collect()
}

#[test]
fn product_statement_is_a_declaration() {
    let tree = parse("a * b;");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (declaration type: (type_identifier) \
         declarator: (pointer_declarator declarator: (identifier))))"
    );
}

#[test]
fn chained_comparisons_stay_expressions() {
    let tree = parse("x = a < b > c;");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (expression_statement (assignment_expression left: (identifier) \
         right: (binary_expression left: (binary_expression left: (identifier) right: (identifier)) \
         right: (identifier)))))"
    );
}

#[test]
fn parenthesized_name_before_minus_is_a_subtraction() {
    let tree = parse("(a) - b;");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (expression_statement (binary_expression \
         left: (parenthesized_expression (identifier)) right: (identifier))))"
    );
}

#[test]
fn else_binds_to_the_nearest_if() {
    let tree = parse("if (a) if (b) c; else d;");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (if_statement condition: (parenthesized_expression (identifier)) \
         consequence: (if_statement condition: (parenthesized_expression (identifier)) \
         consequence: (expression_statement (identifier)) \
         alternative: (expression_statement (identifier)))))"
    );
}

#[test]
fn postfix_operators_chain() {
    let tree = parse("obj.items[i]->run(x, args...);");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (expression_statement (call_expression \
         function: (field_expression argument: (subscript_expression \
         argument: (field_expression argument: (identifier) field: (field_identifier)) \
         index: (identifier)) field: (field_identifier)) \
         arguments: (argument_list (identifier) (parameter_pack_expansion pattern: (identifier))))))"
    );
}

#[test]
fn explicit_template_call() {
    let tree = parse("f<int>(x);");
    assert_eq!(
        tree.to_sexp(),
        "(translation_unit (expression_statement (call_expression \
         function: (template_function name: (identifier) \
         arguments: (template_argument_list (type_descriptor type: (primitive_type)))) \
         arguments: (argument_list (identifier)))))"
    );
}

#[test]
fn nested_template_arguments_split_the_shift_operator() {
    let tree = parse("vector<vector<int>> v;");
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    assert_eq!(top_level(&tree), ["declaration"]);
    let outer = find(tree.root_node(), "template_type").unwrap();
    assert_eq!(outer.byte_range(), 0..19);

    // outside of template arguments it stays one token
    let tree = parse("a >> b;");
    let shift = find(tree.root_node(), "binary_expression").unwrap();
    assert!(shift.children().any(|child| child.kind_name() == ">>"), "{}", tree.to_sexp());
}

#[test]
fn raw_string_runs_to_the_matching_delimiter() {
    let src = r#"s = R"abc(text)a(text)abc";"#;
    let tree = parse(src);
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());

    let literal = find(tree.root_node(), "raw_string_literal").unwrap();
    assert_eq!(literal.text(src.as_bytes()), br#"R"abc(text)a(text)abc""#);
    let content = find(literal, "raw_string_content").unwrap();
    assert_eq!(content.text(src.as_bytes()), b"text)a(text");
    let delimiter = literal.child_by_field_name("delimiter").unwrap();
    assert_eq!(delimiter.text(src.as_bytes()), b"abc");
}

#[test]
fn raw_string_without_delimiter() {
    let src = r#"s = u8R"(a "quoted" b)";"#;
    let tree = parse(src);
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    let content = find(tree.root_node(), "raw_string_content").unwrap();
    assert_eq!(content.text(src.as_bytes()), br#"a "quoted" b"#);
}

#[test]
fn template_function_definition() {
    let src = "template <typename T>\nT max(T a, T b) { return a > b ? a : b; }\n";
    let tree = parse(src);
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    assert_eq!(top_level(&tree), ["template_declaration"]);

    let definition = find(tree.root_node(), "function_definition").unwrap();
    let declarator = definition.child_by_field_name("declarator").unwrap();
    assert_eq!(declarator.kind_name(), "function_declarator");
    let parameters: Vec<_> = declarator
        .child_by_field_name("parameters")
        .unwrap()
        .named_children()
        .map(|n| n.kind_name())
        .collect();
    assert_eq!(parameters, ["parameter_declaration", "parameter_declaration"]);
    assert!(find(definition, "conditional_expression").is_some());
}

#[test]
fn class_keyword_in_template_parameters_names_a_type_parameter() {
    let tree = parse("template <class T, class U> T pick(U u);");
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    let parameters: Vec<_> = find(tree.root_node(), "template_parameter_list")
        .unwrap()
        .named_children()
        .map(|n| n.kind_name())
        .collect();
    assert_eq!(parameters, ["type_parameter_declaration", "type_parameter_declaration"]);
    assert!(find(tree.root_node(), "class_specifier").is_none());
}

#[test]
fn union_is_a_specifier_not_a_stray_keyword() {
    let tree = parse("union U { int i; float f; } u;");
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    let declaration = find(tree.root_node(), "declaration").unwrap();
    let specifier = declaration.child_by_field_name("type").unwrap();
    assert_eq!(specifier.kind_name(), "union_specifier");
    assert_eq!(specifier.child_by_field_name("name").unwrap().kind_name(), "type_identifier");
}

#[test]
fn extras_are_kept_but_not_named_in_the_structure() {
    let src = "#include <stdio.h>\nint x; // trailing\n/* block */ y = 1;\n";
    let tree = parse(src);
    assert!(!tree.root_node().has_error(), "{}", tree.to_sexp());
    assert_eq!(
        top_level(&tree),
        ["preproc_directive", "declaration", "comment", "comment", "expression_statement"]
    );
    assert_eq!(tree.root_node().named_children().filter(|n| n.is_extra()).count(), 3);
}

#[rstest]
#[case::empty("")]
#[case::stray_brace("}")]
#[case::missing_value("int x = ;")]
#[case::unknown_bytes("@@ $ @")]
#[case::double_star("a * * b;")]
#[case::unterminated_raw_string("s = R\"abc(never closed")]
#[case::unterminated_block("int f() { if (x) {")]
#[case::garbage_between("int a; ) ) ) int b;")]
fn every_input_yields_a_covering_tree(#[case] src: &str) {
    let tree = parse(src);
    let root = tree.root_node();
    assert_eq!(root.byte_range(), 0..src.len());
    let covered: usize = tree.leaves().map(|leaf| leaf.byte_range().len()).sum();
    assert_eq!(covered, src.len());
}

#[test]
fn errors_stay_local() {
    let tree = parse("int a;\nint b = ;\nint c;\n");
    let root = tree.root_node();
    assert!(root.has_error());
    let first = root.named_children().next().unwrap();
    assert_eq!(first.kind_name(), "declaration");
    assert!(!first.has_error());
}

#[test]
fn parsing_is_deterministic() {
    let src = "a * b; x = a < b > c; f<int>(y); s = R\"d(x)d\";";
    assert_eq!(parse(src).to_sexp(), parse(src).to_sexp());
}

#[rstest]
#[case::append_statement("int a;\nint b;\n", 14, 0, "c = a + b;\n")]
#[case::rename("int count = 1;\ncount = count * 2;\n", 4, 5, "total")]
#[case::turn_declaration_into_expression("a * b;\nc;\n", 1, 3, " + ")]
#[case::edit_raw_string_content("s = R\"x(one)x\";\nint z;\n", 8, 3, "two)y(three")]
#[case::break_the_delimiter("s = R\"x(one)x\";\nint z;\n", 12, 1, "y")]
#[case::delete_a_brace("int f() { return 1; }\nint g;\n", 8, 1, "")]
#[case::insert_into_empty("", 0, 0, "int x;")]
#[case::declaration_after_an_error_becomes_an_expression(
    "/* k */vector<vector<int>> v;\na * b;\na * b;\n",
    28,
    2,
    "<"
)]
#[case::nest_a_template_argument("vector<int> v;\nf(a < b);\n", 7, 3, "vector<int>")]
fn reparse_matches_a_fresh_parse(
    #[case] old: &str,
    #[case] start: usize,
    #[case] old_len: usize,
    #[case] text: &str,
) {
    let old_tree = parse(old);
    let (edit, new) = Edit::apply(old.as_bytes(), start, old_len, text.as_bytes());
    let reparsed = tangle_cpp::reparse(&old_tree, &edit, &new).unwrap();
    let fresh = tangle_cpp::parse(&new).unwrap();
    assert_eq!(dump(&reparsed), dump(&fresh));
    assert_eq!(reparsed.root_node().byte_range(), 0..new.len());
}

fn program() -> impl Strategy<Value = String> {
    let statement = prop_oneof![
        Just("a * b;\n"),
        Just("x = a < b > c;\n"),
        Just("vector<vector<int>> v;\n"),
        Just("f<int>(x, args...);\n"),
        Just("s = R\"d(x)d\";\n"),
        Just("if (a) b; else c;\n"),
        Just("int f(int a) { return a >> 1; }\n"),
        Just("struct S { int x; };\n"),
        Just("template <class T> T id(T t);\n"),
        Just("(a) - b;\n"),
        Just("// note\n"),
    ];
    prop::collection::vec(statement, 1..6).prop_map(|statements| statements.concat())
}

fn edit() -> impl Strategy<Value = (prop::sample::Index, usize, &'static str)> {
    let text = prop_oneof![
        Just(""),
        Just(";"),
        Just("a"),
        Just(" "),
        Just("<"),
        Just(">"),
        Just("*"),
        Just("("),
        Just(")"),
        Just("{"),
        Just("int "),
        Just("R\"q("),
        Just(")q\""),
        Just("\n"),
    ];
    (any::<prop::sample::Index>(), 0..4usize, text)
}

#[test]
fn random_edits_reparse_like_a_fresh_parse() {
    let config = Config {
        cases: 300,
        failure_persistence: None,
        ..Config::default()
    };
    let mut runner =
        TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha));
    let cases = (program(), prop::collection::vec(edit(), 1..5));

    runner
        .run(&cases, |(mut src, edits)| {
            let mut tree = parse(&src);
            for (at, old_len, text) in edits {
                let start = at.index(src.len() + 1);
                let (edit, new) = Edit::apply(src.as_bytes(), start, old_len, text.as_bytes());
                let reparsed = tangle_cpp::reparse(&tree, &edit, &new).unwrap();
                let fresh = tangle_cpp::parse(&new).unwrap();
                prop_assert_eq!(dump(&reparsed), dump(&fresh), "{:?}", String::from_utf8_lossy(&new));
                // every edit in the pool keeps the text valid utf-8
                src = String::from_utf8_lossy(&new).into_owned();
                tree = reparsed;
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn pack_expansion_as_an_expression_is_an_ambiguity_cycle() {
    let mut grammar = tangle_cpp::grammar::grammar();
    let handle = grammar.find_rule("_expression").unwrap();
    let expression = grammar.rules[handle].pattern.clone();
    grammar.rules[handle].pattern = choice([expression, sym("parameter_pack_expansion")]);

    let errors = grammar.compile(&Default::default()).err().unwrap();
    assert!(errors.mentions("argument_list", "ambiguity cycle"), "{errors}");
}
