//! Snapshots of the textual dump of resolved trees.

use reflow_layout::{
    measure, ComponentTree, Edges, Node, NodeTree, RequestedSize, ResolverOptions, SizeConstraint,
    SizeSpec, Style,
};

#[test]
fn describe_resolved_page() {
    let page = Node::container(measure::column())
        .with_name("page")
        .with_style(Style::default().with_padding(Edges::uniform(4)));
    let mut builder = NodeTree::builder(page);
    let root = builder.root();

    builder
        .add_child(root, Node::leaf(measure::fixed(120, 24)).with_name("title"))
        .unwrap();
    let body = builder
        .add_child(
            root,
            Node::container(measure::column()).with_name("body").with_style(Style {
                width: RequestedSize::Fill,
                ..Default::default()
            }),
        )
        .unwrap();
    builder
        .add_child(
            body,
            Node::deferred(measure::fixed(200, 60))
                .with_name("paragraph")
                .with_style(Style::fill()),
        )
        .unwrap();
    builder
        .add_child(
            root,
            Node::leaf(measure::fill()).with_name("footer").with_style(Style::fixed(200, 16)),
        )
        .unwrap();

    let tree = ComponentTree::new(builder.freeze());
    let result = tree.calculate_layout(SizeConstraint::exact(320, 240)).unwrap();

    insta::assert_snapshot!(tree.nodes().describe(&result), @r"
    page [EXACT(320) x EXACT(240)] 320x240
      title [AT_MOST(312) x AT_MOST(232)] 120x24
      body [EXACT(312) x AT_MOST(232)] 312x60
        paragraph [EXACT(312) x AT_MOST(232)] 312x60
      footer [EXACT(200) x EXACT(16)] 200x16
    ");
}

#[test]
fn describe_pending_holder() {
    let mut builder = NodeTree::builder(Node::container(measure::fixed(100, 50)).with_name("list"));
    let root = builder.root();
    builder
        .add_child(
            root,
            Node::deferred(measure::fill()).with_name("row").with_style(Style::fill()),
        )
        .unwrap();

    let options = ResolverOptions {
        resolve_deferred_after_measure: false,
        ..Default::default()
    };
    let tree = ComponentTree::with_options(builder.freeze(), options);
    let constraint = SizeConstraint::new(SizeSpec::at_most(100), SizeSpec::unspecified());
    let result = tree.calculate_layout(constraint).unwrap();

    insta::assert_snapshot!(tree.nodes().describe(&result), @r"
    list [AT_MOST(100) x UNSPECIFIED] 100x50
      row (pending)
    ");
}
