//! The JavaScript AST the compiler emits into. One variant per node
//! kind; the printer serializes it to source text.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsUnop {
    Not,
    Neg,
    TypeOf,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsBinop {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    StrictEq,
    StrictNe,
    And,
    Or,
    InstanceOf,
    In,
}

impl JsBinop {
    pub fn symbol(&self) -> &'static str {
        match self {
            JsBinop::Add => "+",
            JsBinop::Sub => "-",
            JsBinop::Mul => "*",
            JsBinop::Div => "/",
            JsBinop::Mod => "%",
            JsBinop::Lt => "<",
            JsBinop::Gt => ">",
            JsBinop::Le => "<=",
            JsBinop::Ge => ">=",
            JsBinop::StrictEq => "===",
            JsBinop::StrictNe => "!==",
            JsBinop::And => "&&",
            JsBinop::Or => "||",
            JsBinop::InstanceOf => "instanceof",
            JsBinop::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Ident(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Array(Vec<JsExpr>),
    Object(Vec<(String, JsExpr)>),
    Function {
        params: Vec<String>,
        body: Vec<JsStmt>,
    },
    Call(Box<JsExpr>, Vec<JsExpr>),
    MethodCall(Box<JsExpr>, String, Vec<JsExpr>),
    Get(Box<JsExpr>, String),
    Property(Box<JsExpr>, Box<JsExpr>),
    New(Box<JsExpr>, Vec<JsExpr>),
    Unary(JsUnop, Box<JsExpr>),
    Binary(JsBinop, Box<JsExpr>, Box<JsExpr>),
    Cond(Box<JsExpr>, Box<JsExpr>, Box<JsExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchClause {
    /// None is the `default:` clause.
    pub label: Option<JsExpr>,
    pub body: Vec<JsStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsStmt {
    Var(String, Option<JsExpr>),
    Assign(JsExpr, JsExpr),
    Expr(JsExpr),
    If(JsExpr, Vec<JsStmt>, Option<Vec<JsStmt>>),
    Switch(JsExpr, Vec<SwitchClause>),
    While(JsExpr, Vec<JsStmt>),
    For {
        init: Option<Box<JsStmt>>,
        test: Option<JsExpr>,
        step: Option<Box<JsStmt>>,
        body: Vec<JsStmt>,
    },
    ForIn {
        var: String,
        object: JsExpr,
        body: Vec<JsStmt>,
    },
    Label(String, Box<JsStmt>),
    Break(Option<String>),
    Try {
        body: Vec<JsStmt>,
        catch: Option<(String, Vec<JsStmt>)>,
        finally: Option<Vec<JsStmt>>,
    },
    Throw(JsExpr),
    Return(JsExpr),
    Block(Vec<JsStmt>),
}

// --- Construction helpers ---

pub fn ident(name: impl Into<String>) -> JsExpr {
    JsExpr::Ident(name.into())
}

/// A reference to a runtime helper: `internals.<name>`.
pub fn internals(name: &str) -> JsExpr {
    JsExpr::Get(Box::new(ident("internals")), name.to_string())
}

pub fn call(func: JsExpr, args: Vec<JsExpr>) -> JsExpr {
    JsExpr::Call(Box::new(func), args)
}

pub fn method_call(object: JsExpr, method: &str, args: Vec<JsExpr>) -> JsExpr {
    JsExpr::MethodCall(Box::new(object), method.to_string(), args)
}

pub fn get(object: JsExpr, property: &str) -> JsExpr {
    JsExpr::Get(Box::new(object), property.to_string())
}

pub fn property(object: JsExpr, key: JsExpr) -> JsExpr {
    JsExpr::Property(Box::new(object), Box::new(key))
}

pub fn new(class: JsExpr, args: Vec<JsExpr>) -> JsExpr {
    JsExpr::New(Box::new(class), args)
}

pub fn unary(op: JsUnop, operand: JsExpr) -> JsExpr {
    JsExpr::Unary(op, Box::new(operand))
}

pub fn binary(op: JsBinop, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
    JsExpr::Binary(op, Box::new(lhs), Box::new(rhs))
}

pub fn cond(test: JsExpr, then: JsExpr, otherwise: JsExpr) -> JsExpr {
    JsExpr::Cond(Box::new(test), Box::new(then), Box::new(otherwise))
}

/// `typeof x === "<ty>"`
pub fn typeof_is(operand: JsExpr, ty: &str) -> JsExpr {
    binary(
        JsBinop::StrictEq,
        unary(JsUnop::TypeOf, operand),
        JsExpr::Str(ty.to_string()),
    )
}

/// `arguments.length - 1`: the user-visible argument count, excluding
/// the leading values-context marker.
pub fn nargs() -> JsExpr {
    binary(
        JsBinop::Sub,
        get(ident("arguments"), "length"),
        JsExpr::Integer(1),
    )
}

/// `arguments[<user index> + 1]`, skipping the values-context marker.
pub fn argument_at(index: JsExpr) -> JsExpr {
    property(
        ident("arguments"),
        binary(JsBinop::Add, index, JsExpr::Integer(1)),
    )
}
