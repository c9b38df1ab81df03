use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::source::Source;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: usize,
    /// Tag that produced the node, when it came from `{% ... %}`.
    pub tag: Option<&'static str>,
}

impl Node {
    pub fn new(kind: NodeKind, line: usize) -> Self {
        Self { kind, line, tag: None }
    }

    pub fn body(nodes: Vec<Node>, line: usize) -> Self {
        Self::new(NodeKind::Body(nodes), line)
    }

    pub fn empty(line: usize) -> Self {
        Self::body(Vec::new(), line)
    }

    /// Nodes that write to the output directly.
    pub fn is_output(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Text(_)
                | NodeKind::Print(_)
                | NodeKind::Include { .. }
                | NodeKind::Embed { .. }
                | NodeKind::BlockReference(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Body(Vec<Node>),
    Text(String),
    Print(Expr),
    If {
        tests: Vec<(Expr, Node)>,
        otherwise: Option<Box<Node>>,
    },
    For {
        key: String,
        value: String,
        seq: Expr,
        body: Box<Node>,
        otherwise: Option<Box<Node>>,
        with_loop: bool,
    },
    BlockReference(String),
    Set {
        names: Vec<String>,
        value: SetValue,
    },
    With {
        variables: Option<Expr>,
        only: bool,
        body: Box<Node>,
    },
    Include {
        expr: Expr,
        variables: Option<Expr>,
        only: bool,
        ignore_missing: bool,
    },
    /// An `{% embed %}`; the module lives in the enclosing module's `embedded` list under `index`.
    Embed {
        index: usize,
        variables: Option<Expr>,
        only: bool,
        ignore_missing: bool,
    },
    Import {
        template: Expr,
        var: String,
        global: bool,
    },
    Sandbox(Box<Node>),
    AutoEscape {
        strategy: Option<String>,
        body: Box<Node>,
    },
    Do(Expr),
    Flush,
    Deprecated(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Exprs(Vec<Expr>),
    /// `{% set x %}...{% endset %}`; the rendered body is stored as markup.
    Capture(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn constant(value: Literal, line: usize) -> Self {
        Self::new(ExprKind::Const(value), line)
    }

    pub fn string(value: impl Into<String>, line: usize) -> Self {
        Self::constant(Literal::Str(value.into()), line)
    }

    pub fn name(name: impl Into<String>, line: usize) -> Self {
        Self::new(ExprKind::Name(name.into()), line)
    }

    pub fn as_const(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Literal),
    Name(String),
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        node: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    GetAttr {
        object: Box<Expr>,
        attribute: Box<Expr>,
        arguments: Option<Box<Expr>>,
        call_type: CallType,
    },
    /// `alias.name(...)` where `alias` is an imported template (or `_self`).
    MacroCall {
        template: String,
        name: String,
        args: Vec<Arg>,
    },
    Filter {
        node: Box<Expr>,
        name: String,
        args: Vec<Arg>,
    },
    Function {
        name: String,
        args: Vec<Arg>,
    },
    Test {
        node: Box<Expr>,
        name: String,
        args: Vec<Arg>,
    },
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Parent {
        block: String,
    },
    BlockRef {
        name: Box<Expr>,
        template: Option<Box<Expr>>,
    },
}

impl ExprKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExprKind::Const(_) => "Constant",
            ExprKind::Name(_) => "Name",
            ExprKind::Array(_) => "Array",
            ExprKind::Hash(_) => "Hash",
            ExprKind::Unary { .. } => "Unary",
            ExprKind::Binary { .. } => "Binary",
            ExprKind::Conditional { .. } => "Conditional",
            ExprKind::GetAttr { .. } => "GetAttr",
            ExprKind::MacroCall { .. } => "MacroCall",
            ExprKind::Filter { .. } => "Filter",
            ExprKind::Function { .. } => "Function",
            ExprKind::Test { .. } => "Test",
            ExprKind::Arrow { .. } => "ArrowFunction",
            ExprKind::Parent { .. } => "Parent",
            ExprKind::BlockRef { .. } => "BlockReference",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

impl Arg {
    pub fn positional(value: Expr) -> Self {
        Self { name: None, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(n) => write!(f, "{n:?}"),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Any,
    Method,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Xor,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    NotEq,
    Spaceship,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
    Matches,
    StartsWith,
    EndsWith,
    HasSome,
    HasEvery,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    NullCoalesce,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Xor => "xor",
            BinaryOp::BitOr => "b-or",
            BinaryOp::BitXor => "b-xor",
            BinaryOp::BitAnd => "b-and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Spaceship => "<=>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Matches => "matches",
            BinaryOp::StartsWith => "starts with",
            BinaryOp::EndsWith => "ends with",
            BinaryOp::HasSome => "has some",
            BinaryOp::HasEvery => "has every",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "~",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::NullCoalesce => "??",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub name: String,
    pub body: Node,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroNode {
    pub name: String,
    /// Parameter names with their default values (`null` when none was given).
    pub params: Vec<(String, Expr)>,
    pub body: Node,
    pub line: usize,
}

/// `{% use "template" with a as b %}`: blocks imported horizontally, with renames.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitUse {
    pub template: Expr,
    pub targets: IndexMap<String, String>,
}

/// Every sandbox-relevant symbol a module uses, with the line of its first use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityCheck {
    pub tags: IndexMap<String, usize>,
    pub filters: IndexMap<String, usize>,
    pub functions: IndexMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub body: Node,
    pub parent: Option<Expr>,
    pub blocks: IndexMap<String, BlockNode>,
    pub macros: IndexMap<String, MacroNode>,
    pub traits: Vec<TraitUse>,
    pub embedded: Vec<Arc<ModuleNode>>,
    /// Set for embedded modules.
    pub index: Option<usize>,
    pub source: Source,
    pub security_check: Option<SecurityCheck>,
}

impl ModuleNode {
    pub fn new(body: Node, source: Source) -> Self {
        Self {
            body,
            parent: None,
            blocks: IndexMap::new(),
            macros: IndexMap::new(),
            traits: Vec::new(),
            embedded: Vec::new(),
            index: None,
            source,
            security_check: None,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Find an embedded module by index anywhere below this one.
    pub fn find_embedded(&self, index: usize) -> Option<&Arc<ModuleNode>> {
        self.embedded.iter().find_map(|module| {
            if module.index == Some(index) {
                Some(module)
            } else {
                module.find_embedded(index)
            }
        })
    }
}
