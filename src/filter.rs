//! 把过滤条件结构体编译为带参数的 SQL 谓词
//!
//! 每个过滤类型通过 [`FilterSpec::fields`] 声明一张静态的字段表，
//! [`FilterCompiler::build`] 只在初始化时读取一次这张表：
//! 必填字段在构建时就拼接成固定的前缀，可选字段只在取值有效时追加到后面。

use serde::Serialize;
use thiserror::Error;

/// 比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ge,
    Le,
    Like,
    /// 集合成员，绑定值为一个列表
    In,
}

impl FilterOp {
    fn render(self, column: &str) -> String {
        match self {
            Self::Eq => format!("{column} = ?"),
            Self::Ge => format!("{column} >= ?"),
            Self::Le => format!("{column} <= ?"),
            Self::Like => format!("{column} LIKE ?"),
            // NOTE: 列表以 JSON 数组的形式绑定到一个参数上，这样谓词文本不随列表长度变化
            Self::In => format!("{column} IN (SELECT value FROM json_each(?))"),
        }
    }
}

/// 绑定到 SQL 参数上的值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlArg {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for SqlArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// 字段在一次调用中的取值，`Null` 表示该字段无效
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    One(SqlArg),
    Many(Vec<SqlArg>),
}

impl FieldValue {
    pub fn one(v: impl Into<SqlArg>) -> Self {
        Self::One(v.into())
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Null)
    }

    fn into_arg(self) -> SqlArg {
        match self {
            Self::Null => SqlArg::Null,
            Self::One(arg) => arg,
            Self::Many(args) => {
                SqlArg::Text(serde_json::to_string(&args).unwrap_or_else(|_| String::from("[]")))
            }
        }
    }
}

impl<V: Into<SqlArg>> From<Option<V>> for FieldValue {
    fn from(v: Option<V>) -> Self {
        match v {
            Some(v) => Self::One(v.into()),
            None => Self::Null,
        }
    }
}

impl<V: Into<SqlArg>> From<Vec<V>> for FieldValue {
    fn from(v: Vec<V>) -> Self {
        Self::Many(v.into_iter().map(Into::into).collect())
    }
}

/// 过滤字段描述：逻辑名、数据库列、比较方式、参数名、是否可空
pub struct FilterField<T> {
    name: &'static str,
    column: Option<&'static str>,
    op: FilterOp,
    placeholder: &'static str,
    nullable: bool,
    value: fn(&T) -> FieldValue,
}

impl<T> FilterField<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            column: None,
            op: FilterOp::Eq,
            placeholder: "",
            nullable: false,
            value: |_| FieldValue::Null,
        }
    }

    pub fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    pub fn op(mut self, op: FilterOp) -> Self {
        self.op = op;
        self
    }

    pub fn placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn value(mut self, value: fn(&T) -> FieldValue) -> Self {
        self.value = value;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 可以被编译为 SQL 谓词的过滤类型
pub trait FilterSpec: Sized + 'static {
    fn fields() -> Vec<FilterField<Self>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("过滤类型没有任何引用数据库列的字段")]
    NoColumns,
    #[error("字段 {0} 缺少参数名")]
    MissingPlaceholder(&'static str),
}

/// 编译结果，`args` 与 `sql` 中的 `?` 一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub args: Vec<SqlArg>,
    /// 每个参数对应的参数名，仅用于调试
    pub placeholders: Vec<&'static str>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// 返回 `WHERE ...`，谓词为空时返回空字符串
    pub fn where_clause(&self) -> String {
        if self.is_empty() { String::new() } else { format!("WHERE {}", self.sql) }
    }
}

struct CompiledField<T> {
    template: String,
    placeholder: &'static str,
    value: fn(&T) -> FieldValue,
}

pub struct FilterCompiler<T> {
    prefix: String,
    required: Vec<CompiledField<T>>,
    optional: Vec<CompiledField<T>>,
}

impl<T: FilterSpec> FilterCompiler<T> {
    /// 读取 `T` 的字段表，没有引用数据库列的字段会被忽略
    pub fn build() -> Result<Self, FilterError> {
        let mut required = vec![];
        let mut optional = vec![];

        for field in T::fields() {
            let Some(column) = field.column else {
                continue;
            };
            if field.placeholder.is_empty() {
                return Err(FilterError::MissingPlaceholder(field.name));
            }
            let compiled = CompiledField {
                template: field.op.render(column),
                placeholder: field.placeholder,
                value: field.value,
            };
            if field.nullable {
                optional.push(compiled);
            } else {
                required.push(compiled);
            }
        }

        if required.is_empty() && optional.is_empty() {
            return Err(FilterError::NoColumns);
        }

        let prefix = required.iter().map(|f| f.template.as_str()).collect::<Vec<_>>().join(" AND ");

        Ok(Self { prefix, required, optional })
    }

    /// 编译一个过滤值，可选字段按声明顺序追加
    pub fn compile(&self, filter: &T) -> Predicate {
        let mut args = Vec::with_capacity(self.required.len() + self.optional.len());
        let mut placeholders = Vec::with_capacity(args.capacity());

        for field in &self.required {
            args.push((field.value)(filter).into_arg());
            placeholders.push(field.placeholder);
        }

        let mut suffix = vec![];
        for field in &self.optional {
            let value = (field.value)(filter);
            if !value.is_valid() {
                continue;
            }
            suffix.push(field.template.as_str());
            args.push(value.into_arg());
            placeholders.push(field.placeholder);
        }

        let mut sql = self.prefix.clone();
        if !suffix.is_empty() {
            if !sql.is_empty() {
                sql.push_str(" AND ");
            }
            sql.push_str(&suffix.join(" AND "));
        }

        Predicate { sql, args, placeholders }
    }

    /// 固定前缀部分
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestFilter {
        ids: Vec<i64>,
        min: Option<i64>,
        max: Option<f64>,
        name: Option<String>,
        ignored: Option<i64>,
    }

    impl FilterSpec for TestFilter {
        fn fields() -> Vec<FilterField<Self>> {
            vec![
                FilterField::new("ids")
                    .column("id")
                    .op(FilterOp::In)
                    .placeholder("ids")
                    .value(|f: &TestFilter| f.ids.clone().into()),
                FilterField::new("min")
                    .column("size")
                    .op(FilterOp::Ge)
                    .placeholder("size_min")
                    .nullable()
                    .value(|f: &TestFilter| f.min.into()),
                FilterField::new("max")
                    .column("score")
                    .op(FilterOp::Le)
                    .placeholder("score_max")
                    .nullable()
                    .value(|f: &TestFilter| f.max.into()),
                FilterField::new("name")
                    .column("name")
                    .op(FilterOp::Like)
                    .placeholder("name_prefix")
                    .nullable()
                    .value(|f: &TestFilter| f.name.clone().map(|s| format!("{s}%")).into()),
                FilterField::new("ignored").value(|f: &TestFilter| f.ignored.into()),
            ]
        }
    }

    struct NoColumnFilter;

    impl FilterSpec for NoColumnFilter {
        fn fields() -> Vec<FilterField<Self>> {
            vec![FilterField::new("a").placeholder("a")]
        }
    }

    struct MissingPlaceholderFilter;

    impl FilterSpec for MissingPlaceholderFilter {
        fn fields() -> Vec<FilterField<Self>> {
            vec![FilterField::new("a").column("a")]
        }
    }

    struct OptionalOnly {
        a: Option<i64>,
    }

    impl FilterSpec for OptionalOnly {
        fn fields() -> Vec<FilterField<Self>> {
            vec![
                FilterField::new("a")
                    .column("a")
                    .op(FilterOp::Eq)
                    .placeholder("a")
                    .nullable()
                    .value(|f: &OptionalOnly| f.a.into()),
            ]
        }
    }

    #[test]
    fn test_prefix_only() {
        let compiler = FilterCompiler::<TestFilter>::build().unwrap();
        let filter = TestFilter { ids: vec![1, 2], ..Default::default() };
        let predicate = compiler.compile(&filter);
        assert_eq!(predicate.sql, "id IN (SELECT value FROM json_each(?))");
        assert_eq!(predicate.args, vec![SqlArg::Text("[1,2]".into())]);
        assert_eq!(predicate.placeholders, vec!["ids"]);
        assert_eq!(compiler.prefix(), predicate.sql);
    }

    #[test]
    fn test_optional_fields_appended() {
        let compiler = FilterCompiler::<TestFilter>::build().unwrap();
        let filter = TestFilter {
            ids: vec![3],
            min: Some(10),
            name: Some("abc".into()),
            ignored: Some(1),
            ..Default::default()
        };
        let predicate = compiler.compile(&filter);
        assert_eq!(
            predicate.sql,
            "id IN (SELECT value FROM json_each(?)) AND size >= ? AND name LIKE ?"
        );
        assert_eq!(
            predicate.args,
            vec![SqlArg::Text("[3]".into()), SqlArg::Int(10), SqlArg::Text("abc%".into())]
        );
        assert_eq!(predicate.placeholders, vec!["ids", "size_min", "name_prefix"]);
    }

    #[test]
    fn test_monotonic_growth() {
        let compiler = FilterCompiler::<TestFilter>::build().unwrap();
        let base = TestFilter { ids: vec![1], ..Default::default() };
        let more = TestFilter { ids: vec![1], max: Some(5.0), ..Default::default() };
        let a = compiler.compile(&base);
        let b = compiler.compile(&more);
        assert!(a.sql.len() < b.sql.len());
        assert!(a.args.len() < b.args.len());
    }

    #[test]
    fn test_deterministic() {
        let compiler = FilterCompiler::<TestFilter>::build().unwrap();
        let filter = TestFilter {
            ids: vec![1],
            min: Some(1),
            max: Some(2.0),
            name: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(compiler.compile(&filter), compiler.compile(&filter));
    }

    #[test]
    fn test_optional_without_prefix() {
        let compiler = FilterCompiler::<OptionalOnly>::build().unwrap();
        assert_eq!(compiler.prefix(), "");
        assert!(compiler.compile(&OptionalOnly { a: None }).is_empty());
        assert_eq!(compiler.compile(&OptionalOnly { a: None }).where_clause(), "");

        let predicate = compiler.compile(&OptionalOnly { a: Some(7) });
        assert_eq!(predicate.sql, "a = ?");
        assert_eq!(predicate.where_clause(), "WHERE a = ?");
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(FilterCompiler::<NoColumnFilter>::build().err(), Some(FilterError::NoColumns));
        assert_eq!(
            FilterCompiler::<MissingPlaceholderFilter>::build().err(),
            Some(FilterError::MissingPlaceholder("a"))
        );
    }

    #[test]
    fn test_concurrent_compile() {
        let compiler = FilterCompiler::<TestFilter>::build().unwrap();
        std::thread::scope(|s| {
            for i in 0..4 {
                let compiler = &compiler;
                s.spawn(move || {
                    let filter = TestFilter { ids: vec![i], min: Some(i), ..Default::default() };
                    let predicate = compiler.compile(&filter);
                    assert_eq!(predicate.args[1], SqlArg::Int(i));
                });
            }
        });
    }
}
