use std::sync::Arc;

use relq_core::catalog::{Entity, EntityRegistry, TableInfo};
use relq_core::config::ProviderConfig;
use relq_core::expr::sql::JoinKind;
use relq_core::expr::{self, Expr, add, eq, lambda, lit, not_eq, param, record, var};
use relq_core::provider::QueryProvider;
use relq_core::provider::query::Query;
use relq_core::rowsource::memory::MemoryRowSource;
use relq_core::types::{DataType, FromValue, RecordValue, Value};
use relq_error::{DbErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Student {
    id: i32,
    name: String,
    group_id: i32,
}

impl FromValue for Student {
    fn from_value(value: Value) -> Result<Self> {
        let mut record = RecordValue::from_value(value)?;
        Ok(Student {
            id: record.take("Id")?,
            name: record.take("Name")?,
            group_id: record.take("GroupId")?,
        })
    }
}

impl Entity for Student {
    const NAME: &'static str = "Student";

    fn table_info() -> TableInfo {
        TableInfo::new(Self::NAME, "Students")
            .with_member("Id", DataType::Int32)
            .with_member("Name", DataType::Utf8)
            .with_member("GroupId", DataType::Int32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Group {
    id: i32,
    title: String,
}

impl FromValue for Group {
    fn from_value(value: Value) -> Result<Self> {
        let mut record = RecordValue::from_value(value)?;
        Ok(Group {
            id: record.take("Id")?,
            title: record.take("Title")?,
        })
    }
}

impl Entity for Group {
    const NAME: &'static str = "Group";

    fn table_info() -> TableInfo {
        TableInfo::new(Self::NAME, "Groups")
            .with_member("Id", DataType::Int32)
            .with_member("Title", DataType::Utf8)
    }
}

fn setup(source: MemoryRowSource) -> (Arc<MemoryRowSource>, QueryProvider) {
    setup_with_config(source, ProviderConfig::default())
}

fn setup_with_config(
    source: MemoryRowSource,
    config: ProviderConfig,
) -> (Arc<MemoryRowSource>, QueryProvider) {
    logutil::init_test();

    let mut registry = EntityRegistry::new();
    registry.register_entity::<Student>().unwrap();
    registry.register_entity::<Group>().unwrap();

    let source = Arc::new(source);
    let provider = QueryProvider::new(source.clone(), registry, config);
    (source, provider)
}

fn student() -> relq_core::expr::source::ParameterExpr {
    param("s", Student::datatype())
}

fn utf8(s: &str) -> Value {
    Value::Utf8(s.to_string())
}

#[test]
fn filter_then_select_round_trip() {
    let (source, provider) =
        setup(MemoryRowSource::new().with_fallback(|_| Some(vec![vec![utf8("B")]])));

    let s = student();
    let s2 = student();
    let query: Query<String> = provider
        .query::<Student>()
        .filter(lambda([s.clone()], not_eq(s.member("Id"), lit(1))))
        .select(lambda([s2.clone()], s2.member("Name")));

    let sql = query.sql().unwrap();
    assert!(sql.starts_with("SELECT t2.name\n"), "{sql}");
    assert!(sql.contains("WHERE t1.id <> 1"), "{sql}");

    assert_eq!(vec!["B".to_string()], query.to_vec().unwrap());
    assert_eq!(vec![sql], source.executed_commands());
}

#[test]
fn entities_materialize_from_records() {
    let (_, provider) = setup(MemoryRowSource::new().with_fallback(|_| {
        Some(vec![
            vec![Value::Int32(1), utf8("Ann"), Value::Int32(10)],
            vec![Value::Int64(2), utf8("Bob"), Value::Null],
        ])
    }));

    let got = provider.query::<Student>().execute().unwrap().reader().unwrap();
    let got: Vec<_> = got.collect();

    assert_eq!(
        Student {
            id: 1,
            name: "Ann".to_string(),
            group_id: 10,
        },
        *got[0].as_ref().unwrap()
    );
    // Null into a non-nullable member.
    assert_eq!(DbErrorKind::Conversion, got[1].as_ref().unwrap_err().kind());
}

#[test]
fn captured_variable_folded() {
    let (_, provider) = setup(MemoryRowSource::new());

    let s = student();
    let query = provider.query::<Student>().filter(lambda(
        [s.clone()],
        eq(s.member("Id"), add(var("k", 2), lit(1))),
    ));

    let sql = query.sql().unwrap();
    assert!(sql.contains("WHERE t1.id = 3"), "{sql}");
    assert!(!sql.contains('k'), "{sql}");
}

#[test]
fn join_on_keys() {
    let (source, provider) =
        setup(MemoryRowSource::new().with_fallback(|_| Some(vec![vec![utf8("Ann")]])));

    let s = student();
    let g = param("g", Group::datatype());
    let rs = student();
    let rg = param("g", Group::datatype());
    let query: Query<String> = provider.query::<Student>().join(
        &provider.query::<Group>(),
        lambda([s.clone()], s.member("GroupId")),
        lambda([g.clone()], g.member("Id")),
        lambda([rs.clone(), rg], rs.member("Name")),
    );

    let translation = provider.translate(query.expr().clone()).unwrap();
    let select = &translation.projection.source;
    assert_eq!(1, select.columns.len());
    assert_eq!("Name", select.columns[0].name);
    let Expr::Join(join) = select.from.as_ref() else {
        panic!("expected join, got {}", select.from);
    };
    assert_eq!(JoinKind::Inner, join.kind);

    assert!(translation.sql.contains("INNER JOIN"), "{}", translation.sql);
    assert!(
        translation.sql.contains("ON t1.group_id = t3.id"),
        "{}",
        translation.sql
    );

    assert_eq!(vec!["Ann".to_string()], query.to_vec().unwrap());
    assert_eq!(1, source.executed_commands().len());
}

#[test]
fn correlated_exists_inlined() {
    let (_, provider) = setup(MemoryRowSource::new());

    let s = student();
    let s1 = student();
    let students = provider.query::<Student>();
    let query = students.filter(lambda(
        [s.clone()],
        students.exists(lambda([s1.clone()], eq(s1.member("Id"), lit(215)))),
    ));

    let sql = query.sql().unwrap();
    assert!(
        sql.contains("WHERE EXISTS (SELECT * FROM students WHERE id = 215)"),
        "{sql}"
    );
}

#[test]
fn not_exists_inlined() {
    let (_, provider) = setup(MemoryRowSource::new());

    let s = student();
    let g = param("g", Group::datatype());
    let query = provider.query::<Student>().filter(lambda(
        [s.clone()],
        provider
            .query::<Group>()
            .not_exists(lambda([g.clone()], eq(g.member("Id"), s.member("GroupId")))),
    ));

    let sql = query.sql().unwrap();
    assert!(
        sql.contains("NOT EXISTS (SELECT * FROM groups WHERE id = t1.group_id)"),
        "{sql}"
    );
}

#[test]
fn results_enumerated_once() {
    let (_, provider) = setup(MemoryRowSource::new().with_fallback(|_| Some(Vec::new())));

    let mut results = provider.query::<Student>().execute().unwrap();
    assert_eq!(0, results.reader().unwrap().count());

    let err = results.reader().unwrap_err();
    assert_eq!(DbErrorKind::SinglePass, err.kind());
}

#[test]
fn retranslation_is_identical() {
    let (_, provider) = setup(MemoryRowSource::new());

    let s = student();
    let query: Query<Value> = provider
        .query::<Student>()
        .filter(lambda([s.clone()], not_eq(s.member("Name"), lit("Petya"))))
        .select(lambda(
            [s.clone()],
            record(
                DataType::Null,
                [("Name", s.member("Name")), ("First", expr::char_at(s.member("Name"), lit(0)))],
            ),
        ));

    let first = provider.translate(query.expr().clone()).unwrap();
    let second = provider.translate(query.expr().clone()).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.projection, second.projection);
    assert!(first.sql.contains("SUBSTR(t2.name, 1, 1) AS c0"), "{}", first.sql);
}

#[test]
fn char_at_materializes_char() {
    let (_, provider) =
        setup(MemoryRowSource::new().with_fallback(|_| Some(vec![vec![utf8("P")]])));

    let s = student();
    let query: Query<char> = provider
        .query::<Student>()
        .select(lambda([s.clone()], expr::char_at(s.member("Name"), lit(0))));

    assert_eq!(vec!['P'], query.to_vec().unwrap());
}

/// Each student with the names of everyone in their group.
fn peers_query(provider: &QueryProvider) -> Query<Value> {
    let s = student();
    let p = param("p", Student::datatype());
    let p2 = param("p", Student::datatype());

    let peers = provider
        .query::<Student>()
        .filter(lambda(
            [p.clone()],
            eq(p.member("GroupId"), s.member("GroupId")),
        ))
        .select::<String>(lambda([p2.clone()], p2.member("Name")));

    provider.query::<Student>().select(lambda(
        [s.clone()],
        record(
            DataType::Null,
            [("Name", s.member("Name")), ("Peers", peers.to_list())],
        ),
    ))
}

fn peers_source() -> MemoryRowSource {
    MemoryRowSource::new().with_fallback(|command| {
        if command.contains("= 10") {
            Some(vec![vec![utf8("Ann")], vec![utf8("Bob")]])
        } else if command.contains("= 20") {
            Some(vec![vec![utf8("Cid")]])
        } else {
            Some(vec![
                vec![utf8("Ann"), Value::Int32(10)],
                vec![utf8("Cid"), Value::Int32(20)],
            ])
        }
    })
}

#[test]
fn nested_query_runs_per_row() {
    let (source, provider) = setup(peers_source());

    let got = peers_query(&provider).to_vec().unwrap();
    assert_eq!(
        vec![
            Value::Record(
                RecordValue::new()
                    .with_field("Name", "Ann")
                    .with_field("Peers", Value::List(vec![utf8("Ann"), utf8("Bob")]))
            ),
            Value::Record(
                RecordValue::new()
                    .with_field("Name", "Cid")
                    .with_field("Peers", Value::List(vec![utf8("Cid")]))
            ),
        ],
        got
    );

    let commands = source.executed_commands();
    assert_eq!(3, commands.len());
    assert!(!commands[0].contains("= 10"), "{}", commands[0]);
    assert!(commands[1].contains("= 10"), "{}", commands[1]);
    assert!(commands[2].contains("= 20"), "{}", commands[2]);
    assert_eq!(0, source.open_cursors());
}

#[test]
fn materializers_cached_per_provider() {
    let (_, provider) = setup(peers_source());

    let query = peers_query(&provider);
    query.to_vec().unwrap();
    let cached = provider.materializer_cache().len();
    // Outer projector plus the nested one.
    assert_eq!(2, cached);

    query.to_vec().unwrap();
    assert_eq!(cached, provider.materializer_cache().len());
}

#[test]
fn materializer_cache_disabled() {
    let mut config = ProviderConfig::default();
    config
        .set_from_value("enable_materializer_cache", Value::Boolean(false))
        .unwrap();
    let (_, provider) = setup_with_config(peers_source(), config);

    assert_eq!(2, peers_query(&provider).to_vec().unwrap().len());
    assert!(provider.materializer_cache().is_empty());
}

#[test]
fn nested_char_index_stays_in_nested_select() {
    let (source, provider) = setup(MemoryRowSource::new().with_fallback(|command| {
        if command.contains("groups") {
            Some(vec![vec![utf8("M")], vec![utf8("A")]])
        } else {
            Some(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]])
        }
    }));

    let s = student();
    let g = param("g", Group::datatype());
    let initials = provider
        .query::<Group>()
        .select::<char>(lambda([g.clone()], expr::char_at(g.member("Title"), lit(0))));
    let query: Query<Value> = provider.query::<Student>().select(lambda(
        [s.clone()],
        record(
            DataType::Null,
            [("Id", s.member("Id")), ("Initials", initials.to_list())],
        ),
    ));

    let sql = query.sql().unwrap();
    assert!(sql.starts_with("SELECT t1.id\n"), "{sql}");
    assert!(!sql.contains("SUBSTR"), "{sql}");

    let got = query.to_vec().unwrap();
    let initials = Value::List(vec![Value::Char('M'), Value::Char('A')]);
    assert_eq!(
        vec![
            Value::Record(
                RecordValue::new()
                    .with_field("Id", 1)
                    .with_field("Initials", initials.clone())
            ),
            Value::Record(
                RecordValue::new()
                    .with_field("Id", 2)
                    .with_field("Initials", initials)
            ),
        ],
        got
    );

    let commands = source.executed_commands();
    assert_eq!(3, commands.len());
    assert!(
        commands[1].contains("SUBSTR(t3.title, 1, 1) AS c0"),
        "{}",
        commands[1]
    );
}

#[test]
fn nested_exists_correlated_per_row() {
    let (source, provider) = setup(MemoryRowSource::new().with_fallback(|command| {
        if command.contains("(id = 1)") {
            Some(vec![vec![utf8("Math")]])
        } else if command.contains("(id = 2)") {
            Some(vec![vec![utf8("Art")], vec![utf8("Bio")]])
        } else {
            Some(vec![
                vec![utf8("Ann"), Value::Int32(1)],
                vec![utf8("Bob"), Value::Int32(2)],
            ])
        }
    }));

    let s = student();
    let g = param("g", Group::datatype());
    let g2 = param("g", Group::datatype());
    let x = param("x", Student::datatype());
    let students = provider.query::<Student>();
    let enrolled = provider
        .query::<Group>()
        .filter(lambda(
            [g.clone()],
            students.exists(lambda(
                [x.clone()],
                expr::and(
                    eq(x.member("GroupId"), g.member("Id")),
                    eq(x.member("Id"), s.member("Id")),
                ),
            )),
        ))
        .select::<String>(lambda([g2.clone()], g2.member("Title")));
    let query: Query<Value> = students.select(lambda(
        [s.clone()],
        record(
            DataType::Null,
            [("Name", s.member("Name")), ("Groups", enrolled.to_list())],
        ),
    ));

    let sql = query.sql().unwrap();
    assert!(sql.starts_with("SELECT t1.name, t1.id\n"), "{sql}");
    assert!(!sql.contains("EXISTS"), "{sql}");

    let got = query.to_vec().unwrap();
    assert_eq!(
        vec![
            Value::Record(
                RecordValue::new()
                    .with_field("Name", "Ann")
                    .with_field("Groups", Value::List(vec![utf8("Math")]))
            ),
            Value::Record(
                RecordValue::new()
                    .with_field("Name", "Bob")
                    .with_field("Groups", Value::List(vec![utf8("Art"), utf8("Bio")]))
            ),
        ],
        got
    );

    let commands = source.executed_commands();
    assert_eq!(3, commands.len());
    assert!(
        commands[1].contains("EXISTS (SELECT * FROM students WHERE (group_id = t3.id) AND (id = 1))"),
        "{}",
        commands[1]
    );
    assert!(commands[2].contains("(id = 2))"), "{}", commands[2]);
}

#[test]
fn nested_outer_reads_share_one_materializer() {
    let (source, provider) = setup(MemoryRowSource::new().with_fallback(|command| {
        if command.contains("groups") {
            Some(vec![vec![utf8("Math")]])
        } else {
            Some((0..50).map(|i| vec![utf8(&format!("S{i}"))]).collect())
        }
    }));

    let s = student();
    let g = param("g", Group::datatype());
    let titles = provider
        .query::<Group>()
        .select::<String>(lambda([g.clone()], add(g.member("Title"), s.member("Name"))));
    let query: Query<Value> = provider
        .query::<Student>()
        .select(lambda([s.clone()], titles.to_list()));

    let got = query.to_vec().unwrap();
    assert_eq!(50, got.len());
    assert_eq!(Value::List(vec![utf8("MathS0")]), got[0]);
    assert_eq!(Value::List(vec![utf8("MathS49")]), got[49]);
    // Outer projector plus the nested one, regardless of row count.
    assert_eq!(2, provider.materializer_cache().len());

    query.to_vec().unwrap();
    assert_eq!(2, provider.materializer_cache().len());
    assert_eq!(102, source.executed_commands().len());
}

#[test]
fn cursor_released_on_drop() {
    let (source, provider) = setup(peers_source());

    let mut results = peers_query(&provider).execute().unwrap();
    let mut reader = results.reader().unwrap();
    assert!(reader.next().unwrap().is_ok());
    // Nested cursor is drained and released, the outer one stays open.
    assert_eq!(1, source.open_cursors());

    drop(reader);
    assert_eq!(0, source.open_cursors());
}

#[test]
fn cursor_released_on_error() {
    // Rows missing the projected column.
    let (source, provider) = setup(
        MemoryRowSource::new().with_fallback(|_| Some(vec![vec![], vec![utf8("unreached")]])),
    );

    let s = student();
    let query: Query<String> = provider
        .query::<Student>()
        .select(lambda([s.clone()], s.member("Name")));

    let mut results = query.execute().unwrap();
    let mut reader = results.reader().unwrap();
    let err = reader.next().unwrap().unwrap_err();
    assert_eq!(DbErrorKind::OutOfRange, err.kind());
    assert_eq!(0, source.open_cursors());
    assert!(reader.next().is_none());
}

#[test]
fn unknown_command_names_sql() {
    let (_, provider) = setup(MemoryRowSource::new());

    let err = provider.query::<Group>().to_vec().unwrap_err();
    assert_eq!(
        Some("SELECT t0.id, t0.title\nFROM groups t0"),
        err.get_field("sql")
    );
}

#[test]
fn preserved_identifier_case() {
    let config = ProviderConfig::from_json(r#"{"identifier_case": "preserve"}"#).unwrap();
    let (_, provider) = setup_with_config(MemoryRowSource::new(), config);

    let sql = provider.query::<Group>().sql().unwrap();
    assert!(sql.contains("FROM Groups t0"), "{sql}");
    assert!(sql.starts_with("SELECT t0.Id, t0.Title"), "{sql}");
}

#[test]
fn unsupported_method_fails() {
    let (source, provider) = setup(MemoryRowSource::new());

    let query: Query<Value> = provider.create_query(expr::call(
        relq_core::expr::source::Method::Named("OrderBy".to_string()),
        None,
        vec![expr::collection("Student")],
    ));
    let err = query.to_vec().unwrap_err();

    assert_eq!(DbErrorKind::Unsupported, err.kind());
    assert!(err.message().contains("OrderBy"));
    assert!(source.executed_commands().is_empty());
}

#[test]
fn modification_commands_executed() {
    let (source, provider) = setup(MemoryRowSource::new().with_fallback(|_| Some(Vec::new())));

    let s = student();
    provider
        .delete::<Student>(lambda([s.clone()], eq(s.member("Id"), var("id", 1))))
        .unwrap();
    provider
        .update::<Student, _>(
            [("Name", var("name", "Petya"))],
            lambda([s.clone()], eq(s.member("GroupId"), lit(10))),
        )
        .unwrap();
    provider.clear::<Group>().unwrap();

    assert_eq!(
        vec![
            "DELETE FROM students\nWHERE id = 1".to_string(),
            "UPDATE students\nSET name = 'Petya'\nWHERE group_id = 10".to_string(),
            "DELETE FROM groups".to_string(),
        ],
        source.executed_commands()
    );
    assert_eq!(0, source.open_cursors());
}

#[test]
fn modification_command_names_sql() {
    let (_, provider) = setup(MemoryRowSource::new());

    let err = provider.clear::<Student>().unwrap_err();
    assert_eq!(Some("DELETE FROM students"), err.get_field("sql"));
}
