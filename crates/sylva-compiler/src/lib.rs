pub mod builtins;
pub mod compiler;
pub mod environment;
pub mod expander;
pub mod jsast;
pub mod lambda_list;
pub mod literal;
pub mod macro_eval;
pub mod names;
pub mod printer;
pub mod quasiquote;
pub mod special_forms;

pub use compiler::{Compiler, Dest};
pub use environment::{Binding, BindingKind, Environment, GoTag};
pub use expander::MacroFn;
pub use jsast::{JsBinop, JsExpr, JsStmt, JsUnop, SwitchClause};
pub use lambda_list::LambdaList;
pub use printer::{print_program, print_stmt};
