//! End-to-end KaRL evaluation through the knowledge base façade.

use karl_kb::{EvalSettings, KarlError, KnowledgeBase, KnowledgeRecord, KnowledgeValue};

#[test]
fn arithmetic_across_variables() {
    let kb = KnowledgeBase::new();
    kb.evaluate(".var1 = 8; .var2 = 3; .var3 = .var1 + .var2")
        .unwrap();
    assert_eq!(kb.get(".var3").unwrap().as_integer(), 11);
}

#[test]
fn logical_operators() {
    let kb = KnowledgeBase::new();
    kb.evaluate(".var1 = 1; .var2 = 0").unwrap();
    let and = kb.evaluate(".var3 = .var1 && .var2").unwrap();
    assert_eq!(and.as_integer(), 0);
    assert_eq!(kb.get(".var3").unwrap().as_integer(), 0);

    let or = kb.evaluate(".var3 = .var1 || .var2").unwrap();
    assert_eq!(or.as_integer(), 1);
    assert_eq!(kb.get(".var3").unwrap().as_integer(), 1);
}

#[test]
fn for_loop_with_dynamic_names() {
    let kb = KnowledgeBase::new();
    let result = kb.evaluate(".i[0->10) (agent{.i}.state = 1)").unwrap();
    assert_eq!(result.as_integer(), 10);
    assert_eq!(kb.get("agent3.state").unwrap().as_integer(), 1);
    assert_eq!(kb.get("agent0.state").unwrap().as_integer(), 1);
    assert_eq!(kb.get("agent9.state").unwrap().as_integer(), 1);
    assert!(kb.get("agent10.state").unwrap().value.is_uncreated());
    // The loop variable holds its last assigned value.
    assert_eq!(kb.get(".i").unwrap().as_integer(), 9);
}

#[test]
fn compound_assignment_accumulates() {
    let kb = KnowledgeBase::new();
    let result = kb.evaluate(".i = 0; .i += 5; .i += 10").unwrap();
    assert_eq!(result.as_integer(), 15);
    assert_eq!(kb.get(".i").unwrap().as_integer(), 15);
}

#[test]
fn native_function_in_assignment() {
    let kb = KnowledgeBase::new();
    kb.define_function("f", |_, _| Ok(KnowledgeRecord::from(2i64)))
        .unwrap();
    kb.evaluate(".x = f()").unwrap();
    assert_eq!(kb.get(".x").unwrap().as_integer(), 2);
}

#[test]
fn functions_can_read_and_write_knowledge() {
    let kb = KnowledgeBase::new();
    kb.define_function("bump", |args, state| {
        let key = args[0].to_string();
        let next = state.get(&key).value.add(&KnowledgeValue::Integer(1));
        state.apply_update(&key, next.clone(), &karl_kb::UpdateSettings::default())?;
        Ok(KnowledgeRecord::new(next))
    })
    .unwrap();
    kb.set(".count", 6i64).unwrap();
    let result = kb.evaluate("bump('.count')").unwrap();
    assert_eq!(result.as_integer(), 7);
    assert_eq!(kb.get(".count").unwrap().as_integer(), 7);
}

#[test]
fn implication_and_sequencing_compose() {
    let kb = KnowledgeBase::new();
    kb.evaluate("ready = 1; ready => (started = 1; steps = 0)")
        .unwrap();
    assert_eq!(kb.get("started").unwrap().as_integer(), 1);

    kb.evaluate("blocked = 0; blocked => (exploded = 1)").unwrap();
    assert!(kb.get("exploded").unwrap().value.is_uncreated());
}

#[test]
fn string_coercion_in_comparisons() {
    let kb = KnowledgeBase::new();
    kb.evaluate(".name = 'rover'; .speed = '10'").unwrap();
    assert_eq!(kb.evaluate(".speed == 10").unwrap().as_integer(), 1);
    assert_eq!(kb.evaluate(".speed > 9").unwrap().as_integer(), 1);
    assert_eq!(kb.evaluate(".name == 'rover'").unwrap().as_integer(), 1);
}

#[test]
fn division_by_zero_is_reported() {
    let kb = KnowledgeBase::new();
    let err = kb.evaluate(".x = 4 / .unset").unwrap_err();
    assert!(matches!(err, KarlError::Eval(_)));
}

#[test]
fn syntax_errors_fail_fast() {
    let kb = KnowledgeBase::new();
    for source in ["1 +", "agent{", ".i[1->)", "a = = 2", "'open"] {
        let err = kb.evaluate(source).unwrap_err();
        assert!(err.is_compile(), "{source} should fail to compile");
    }
}

#[test]
fn arrays_round_trip_through_expressions() {
    let kb = KnowledgeBase::new();
    kb.evaluate(".path = [1, 2, 3]; .path[3] = 9").unwrap();
    assert_eq!(
        kb.get(".path").unwrap().value,
        KnowledgeValue::IntegerArray(vec![1, 2, 3, 9])
    );
    assert_eq!(kb.evaluate(".path[1]").unwrap().as_integer(), 2);
}

#[test]
fn print_statements_expand_variables() {
    // Print statements only log; this pins down that expansion itself
    // does not disturb evaluation.
    let kb = KnowledgeBase::new();
    let settings = EvalSettings {
        pre_print_statement: Some("starting at {.x}".to_string()),
        post_print_statement: Some("ended at {.x}".to_string()),
        ..EvalSettings::default()
    };
    kb.evaluate_with(".x = 5", &settings).unwrap();
    assert_eq!(kb.get(".x").unwrap().as_integer(), 5);
}

#[test]
fn chained_and_nested_evaluations() {
    let kb = KnowledgeBase::new();
    let result = kb
        .evaluate(".a = .b = 2; .c = .a * .b + 1; .c == 5 && .a == 2")
        .unwrap();
    assert_eq!(result.as_integer(), 1);
}
