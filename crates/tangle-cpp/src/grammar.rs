//! The C-family grammar: declarations, statements, expressions with seventeen
//! precedence levels, templates and raw string literals.

use tangle_backend::{pattern::*, Grammar};

/// Precedence levels, tightest binding first.
pub const PRECEDENCES: &[&str] = &[
    "subscript",
    "field",
    "call",
    "unary",
    "cast",
    "multiply",
    "add",
    "shift",
    "relational",
    "equal",
    "bitwise_and",
    "bitwise_xor",
    "bitwise_or",
    "logical_and",
    "logical_or",
    "conditional",
    "assignment",
];

/// Rule families which may compete for the same input, each set forks the parse.
pub const CONFLICTS: &[&[&str]] = &[
    // `a * b;`, `(a) - b`, `sizeof(a)`
    &["_type_specifier", "_expression"],
    // `a < b`
    &["template_function", "_expression"],
    &["_type_specifier", "_expression", "template_function"],
    // `a<b> * c;`
    &["template_type", "template_function"],
    &["template_type", "template_function", "_expression"],
    // `template <class T>`
    &["type_parameter_declaration", "class_specifier"],
];

const BINARY_OPERATORS: &[(&str, &[&str])] = &[
    ("multiply", &["*", "/", "%"]),
    ("add", &["+", "-"]),
    ("shift", &["<<", ">>"]),
    ("relational", &["<", ">", "<=", ">="]),
    ("equal", &["==", "!="]),
    ("bitwise_and", &["&"]),
    ("bitwise_xor", &["^"]),
    ("bitwise_or", &["|"]),
    ("logical_and", &["&&"]),
    ("logical_or", &["||"]),
];

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "<<=", ">>=", "&=", "^=", "|=",
];

fn toks(texts: &[&str]) -> Pattern {
    choice(texts.iter().map(|text| tok(text)))
}

fn type_identifier() -> Pattern {
    alias(sym("identifier"), "type_identifier")
}

/// Name and member list of a struct, union or class, either may be left out but not both.
fn class_body() -> Pattern {
    choice([
        seq([
            field("name", type_identifier()),
            optional(field("body", sym("field_declaration_list"))),
        ]),
        field("body", sym("field_declaration_list")),
    ])
}

pub fn grammar() -> Grammar {
    Grammar::new("cpp")
        .terminals([
            "identifier",
            "primitive_type",
            "number_literal",
            "string_literal",
            "char_literal",
            "comment",
            "preproc_directive",
            "_whitespace",
        ])
        .externals(["raw_string_delimiter", "raw_string_content"])
        .extras(["_whitespace", "comment", "preproc_directive"])
        .word("identifier")
        .precedences(PRECEDENCES.iter().copied())
        .conflicts(CONFLICTS)
        .rule("translation_unit", repeat(sym("_top_level_item")))
        .rule(
            "_top_level_item",
            choice([
                sym("function_definition"),
                sym("template_declaration"),
                sym("namespace_definition"),
                sym("_block_item"),
            ]),
        )
        .rule(
            "_block_item",
            choice([sym("declaration"), sym("type_definition"), sym("_statement")]),
        )
        // declarations
        .rule(
            "function_definition",
            seq([
                sym("_declaration_specifiers"),
                field("declarator", sym("_declarator")),
                field("body", sym("compound_statement")),
            ]),
        )
        .rule(
            "declaration",
            prec_dynamic(
                1,
                choice([
                    seq([
                        sym("_declaration_specifiers"),
                        sep1(
                            field("declarator", choice([sym("_declarator"), sym("init_declarator")])),
                            ",",
                        ),
                        tok(";"),
                    ]),
                    seq([
                        field(
                            "type",
                            choice([
                                sym("struct_specifier"),
                                sym("union_specifier"),
                                sym("class_specifier"),
                                sym("enum_specifier"),
                            ]),
                        ),
                        tok(";"),
                    ]),
                ]),
            ),
        )
        .rule(
            "type_definition",
            seq([
                tok("typedef"),
                repeat(sym("type_qualifier")),
                field("type", sym("_type_specifier")),
                sep1(field("declarator", sym("_declarator")), ","),
                tok(";"),
            ]),
        )
        .rule(
            "_declaration_specifiers",
            seq([
                repeat(sym("_declaration_modifier")),
                field("type", sym("_type_specifier")),
            ]),
        )
        .rule(
            "_declaration_modifier",
            choice([sym("storage_class_specifier"), sym("type_qualifier")]),
        )
        .rule(
            "storage_class_specifier",
            toks(&["extern", "static", "register", "inline", "thread_local"]),
        )
        .rule("type_qualifier", toks(&["const", "volatile", "constexpr", "mutable"]))
        .rule(
            "init_declarator",
            seq([
                field("declarator", sym("_declarator")),
                tok("="),
                field("value", choice([sym("initializer_list"), sym("_expression")])),
            ]),
        )
        .rule(
            "initializer_list",
            seq([
                tok("{"),
                sep(choice([sym("_expression"), sym("initializer_list")]), ","),
                optional(tok(",")),
                tok("}"),
            ]),
        )
        // types
        .rule(
            "_type_specifier",
            choice([
                sym("primitive_type"),
                sym("sized_type_specifier"),
                type_identifier(),
                sym("template_type"),
                sym("struct_specifier"),
                sym("union_specifier"),
                sym("class_specifier"),
                sym("enum_specifier"),
            ]),
        )
        .rule(
            "sized_type_specifier",
            seq([
                repeat1(toks(&["signed", "unsigned", "long", "short"])),
                optional(field("type", sym("primitive_type"))),
            ]),
        )
        .rule(
            "template_type",
            seq([
                field("name", type_identifier()),
                field("arguments", sym("template_argument_list")),
            ]),
        )
        .rule("struct_specifier", seq([tok("struct"), class_body()]))
        .rule("union_specifier", seq([tok("union"), class_body()]))
        .rule("class_specifier", seq([tok("class"), class_body()]))
        .rule(
            "field_declaration_list",
            seq([tok("{"), repeat(sym("_field_declaration_list_item")), tok("}")]),
        )
        .rule(
            "_field_declaration_list_item",
            choice([
                sym("field_declaration"),
                sym("function_definition"),
                sym("access_specifier"),
            ]),
        )
        .rule(
            "field_declaration",
            seq([
                sym("_declaration_specifiers"),
                sep(field("declarator", sym("_declarator")), ","),
                tok(";"),
            ]),
        )
        .rule(
            "access_specifier",
            seq([toks(&["public", "private", "protected"]), tok(":")]),
        )
        .rule(
            "enum_specifier",
            seq([
                tok("enum"),
                choice([
                    seq([
                        field("name", type_identifier()),
                        optional(field("body", sym("enumerator_list"))),
                    ]),
                    field("body", sym("enumerator_list")),
                ]),
            ]),
        )
        .rule(
            "enumerator_list",
            seq([tok("{"), sep(sym("enumerator"), ","), optional(tok(",")), tok("}")]),
        )
        .rule(
            "enumerator",
            seq([
                field("name", sym("identifier")),
                optional(seq([tok("="), field("value", sym("_expression"))])),
            ]),
        )
        .rule(
            "type_descriptor",
            seq([
                repeat(sym("type_qualifier")),
                field("type", sym("_type_specifier")),
                optional(field("declarator", sym("_abstract_declarator"))),
            ]),
        )
        // declarators
        .rule(
            "_declarator",
            choice([
                sym("identifier"),
                sym("pointer_declarator"),
                sym("reference_declarator"),
                sym("function_declarator"),
                sym("array_declarator"),
            ]),
        )
        .rule(
            "pointer_declarator",
            seq([
                tok("*"),
                repeat(sym("type_qualifier")),
                field("declarator", sym("_declarator")),
            ]),
        )
        .rule(
            "reference_declarator",
            seq([toks(&["&", "&&"]), sym("_declarator")]),
        )
        .rule(
            "function_declarator",
            prec_left(
                1,
                seq([
                    field("declarator", sym("_declarator")),
                    field("parameters", sym("parameter_list")),
                ]),
            ),
        )
        .rule(
            "array_declarator",
            prec_left(
                1,
                seq([
                    field("declarator", sym("_declarator")),
                    tok("["),
                    optional(field("size", sym("_expression"))),
                    tok("]"),
                ]),
            ),
        )
        .rule(
            "_abstract_declarator",
            choice([
                sym("abstract_pointer_declarator"),
                sym("abstract_reference_declarator"),
            ]),
        )
        .rule(
            "abstract_pointer_declarator",
            seq([
                tok("*"),
                optional(field("declarator", sym("_abstract_declarator"))),
            ]),
        )
        .rule(
            "abstract_reference_declarator",
            seq([toks(&["&", "&&"]), optional(sym("_abstract_declarator"))]),
        )
        .rule(
            "parameter_list",
            seq([
                tok("("),
                sep(choice([sym("parameter_declaration"), sym("variadic_parameter")]), ","),
                tok(")"),
            ]),
        )
        .rule(
            "parameter_declaration",
            seq([
                sym("_declaration_specifiers"),
                optional(field(
                    "declarator",
                    choice([sym("_declarator"), sym("_abstract_declarator")]),
                )),
            ]),
        )
        .rule("variadic_parameter", tok("..."))
        // templates
        .rule(
            "template_declaration",
            seq([
                tok("template"),
                field("parameters", sym("template_parameter_list")),
                choice([
                    sym("function_definition"),
                    sym("declaration"),
                    sym("template_declaration"),
                ]),
            ]),
        )
        .rule(
            "template_parameter_list",
            seq([
                tok("<"),
                sep(
                    choice([
                        sym("type_parameter_declaration"),
                        sym("variadic_type_parameter_declaration"),
                        sym("parameter_declaration"),
                    ]),
                    ",",
                ),
                tok(">"),
            ]),
        )
        .rule(
            "type_parameter_declaration",
            prec_dynamic(
                1,
                seq([toks(&["typename", "class"]), optional(type_identifier())]),
            ),
        )
        .rule(
            "variadic_type_parameter_declaration",
            seq([toks(&["typename", "class"]), tok("..."), optional(type_identifier())]),
        )
        // only types and constants, a full expression here would make `<` and
        // `>` ambiguous with comparisons
        .rule(
            "template_argument_list",
            seq([
                tok("<"),
                sep(choice([sym("type_descriptor"), sym("number_literal")]), ","),
                tok(">"),
            ]),
        )
        .rule(
            "template_function",
            seq([
                field("name", sym("identifier")),
                field("arguments", sym("template_argument_list")),
            ]),
        )
        .rule(
            "namespace_definition",
            seq([
                tok("namespace"),
                optional(field("name", alias(sym("identifier"), "namespace_identifier"))),
                field("body", sym("declaration_list")),
            ]),
        )
        .rule(
            "declaration_list",
            seq([tok("{"), repeat(sym("_top_level_item")), tok("}")]),
        )
        // statements
        .rule(
            "_statement",
            choice([sym("case_statement"), sym("_non_case_statement")]),
        )
        .rule(
            "_non_case_statement",
            choice([
                sym("compound_statement"),
                sym("expression_statement"),
                sym("if_statement"),
                sym("switch_statement"),
                sym("while_statement"),
                sym("do_statement"),
                sym("for_statement"),
                sym("return_statement"),
                sym("break_statement"),
                sym("continue_statement"),
            ]),
        )
        .rule(
            "compound_statement",
            seq([tok("{"), repeat(sym("_block_item")), tok("}")]),
        )
        .rule(
            "expression_statement",
            seq([optional(sym("_expression")), tok(";")]),
        )
        .rule(
            "if_statement",
            prec_right(
                0,
                seq([
                    tok("if"),
                    field("condition", sym("parenthesized_expression")),
                    field("consequence", sym("_statement")),
                    optional(seq([tok("else"), field("alternative", sym("_statement"))])),
                ]),
            ),
        )
        .rule(
            "switch_statement",
            seq([
                tok("switch"),
                field("condition", sym("parenthesized_expression")),
                field("body", sym("compound_statement")),
            ]),
        )
        .rule(
            "case_statement",
            prec_right(
                0,
                seq([
                    choice([seq([tok("case"), field("value", sym("_expression"))]), tok("default")]),
                    tok(":"),
                    repeat(choice([
                        sym("declaration"),
                        sym("type_definition"),
                        sym("_non_case_statement"),
                    ])),
                ]),
            ),
        )
        .rule(
            "while_statement",
            seq([
                tok("while"),
                field("condition", sym("parenthesized_expression")),
                field("body", sym("_statement")),
            ]),
        )
        .rule(
            "do_statement",
            seq([
                tok("do"),
                field("body", sym("_statement")),
                tok("while"),
                field("condition", sym("parenthesized_expression")),
                tok(";"),
            ]),
        )
        .rule(
            "for_statement",
            seq([
                tok("for"),
                tok("("),
                choice([
                    field("initializer", sym("declaration")),
                    seq([optional(field("initializer", sym("_expression"))), tok(";")]),
                ]),
                optional(field("condition", sym("_expression"))),
                tok(";"),
                optional(field("update", sym("_expression"))),
                tok(")"),
                field("body", sym("_statement")),
            ]),
        )
        .rule(
            "return_statement",
            seq([tok("return"), optional(sym("_expression")), tok(";")]),
        )
        .rule("break_statement", seq([tok("break"), tok(";")]))
        .rule("continue_statement", seq([tok("continue"), tok(";")]))
        // expressions
        .rule(
            "_expression",
            choice([
                sym("identifier"),
                sym("number_literal"),
                sym("string_literal"),
                sym("char_literal"),
                sym("raw_string_literal"),
                sym("true"),
                sym("false"),
                sym("null"),
                sym("this"),
                sym("parenthesized_expression"),
                sym("template_function"),
                sym("assignment_expression"),
                sym("conditional_expression"),
                sym("binary_expression"),
                sym("unary_expression"),
                sym("pointer_expression"),
                sym("update_expression"),
                sym("cast_expression"),
                sym("sizeof_expression"),
                sym("call_expression"),
                sym("field_expression"),
                sym("subscript_expression"),
            ]),
        )
        .rule("true", tok("true"))
        .rule("false", tok("false"))
        .rule("null", toks(&["NULL", "nullptr"]))
        .rule("this", tok("this"))
        .rule(
            "parenthesized_expression",
            seq([tok("("), sym("_expression"), tok(")")]),
        )
        .rule(
            "assignment_expression",
            prec_right(
                "assignment",
                seq([
                    field("left", sym("_expression")),
                    field("operator", toks(ASSIGNMENT_OPERATORS)),
                    field("right", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "conditional_expression",
            prec_right(
                "conditional",
                seq([
                    field("condition", sym("_expression")),
                    tok("?"),
                    field("consequence", sym("_expression")),
                    tok(":"),
                    field("alternative", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "binary_expression",
            choice(BINARY_OPERATORS.iter().map(|&(level, operators)| {
                prec_left(
                    level,
                    seq([
                        field("left", sym("_expression")),
                        field("operator", toks(operators)),
                        field("right", sym("_expression")),
                    ]),
                )
            })),
        )
        .rule(
            "unary_expression",
            prec_left(
                "unary",
                seq([
                    field("operator", toks(&["!", "~", "-", "+"])),
                    field("argument", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "pointer_expression",
            prec_left(
                "unary",
                seq([
                    field("operator", toks(&["*", "&"])),
                    field("argument", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "update_expression",
            choice([
                prec_right(
                    "unary",
                    seq([
                        field("operator", toks(&["++", "--"])),
                        field("argument", sym("_expression")),
                    ]),
                ),
                prec_left(
                    "unary",
                    seq([
                        field("argument", sym("_expression")),
                        field("operator", toks(&["++", "--"])),
                    ]),
                ),
            ]),
        )
        // `(a) - b` reads as a subtraction when `a` could be either
        .rule(
            "cast_expression",
            prec(
                "cast",
                prec_dynamic(
                    -1,
                    seq([
                        tok("("),
                        field("type", sym("type_descriptor")),
                        tok(")"),
                        field("value", sym("_expression")),
                    ]),
                ),
            ),
        )
        .rule(
            "sizeof_expression",
            prec_right(
                "unary",
                seq([
                    tok("sizeof"),
                    choice([
                        field("value", sym("_expression")),
                        seq([tok("("), field("type", sym("type_descriptor")), tok(")")]),
                    ]),
                ]),
            ),
        )
        .rule(
            "call_expression",
            prec_left(
                "call",
                seq([
                    field("function", sym("_expression")),
                    field("arguments", sym("argument_list")),
                ]),
            ),
        )
        // pack expansions only appear here, allowing them in `_expression` would
        // reach them through two alternatives of the choice below
        .rule(
            "argument_list",
            seq([
                tok("("),
                sep(choice([sym("_expression"), sym("parameter_pack_expansion")]), ","),
                tok(")"),
            ]),
        )
        .rule(
            "parameter_pack_expansion",
            seq([field("pattern", sym("_expression")), tok("...")]),
        )
        .rule(
            "field_expression",
            prec_left(
                "field",
                seq([
                    field("argument", sym("_expression")),
                    field("operator", toks(&[".", "->"])),
                    field("field", alias(sym("identifier"), "field_identifier")),
                ]),
            ),
        )
        .rule(
            "subscript_expression",
            prec_left(
                "subscript",
                seq([
                    field("argument", sym("_expression")),
                    tok("["),
                    field("index", sym("_expression")),
                    tok("]"),
                ]),
            ),
        )
        .rule(
            "raw_string_literal",
            seq([
                toks(&["R\"", "LR\"", "uR\"", "UR\"", "u8R\""]),
                optional(field("delimiter", sym("raw_string_delimiter"))),
                tok("("),
                sym("raw_string_content"),
                tok(")"),
                optional(sym("raw_string_delimiter")),
                tok("\""),
            ]),
        )
}
