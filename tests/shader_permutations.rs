//! Permutation keys and source preprocessing across the public shader API.
//!
//! These run without a GPU: key computation and `#ifdef` expansion are pure,
//! and a `Shader` only touches the device at `init`/`bind`.

use modelview::renderer::shader::{preprocess, GlobalDefines, PermutationSet, Shader, ShaderError};

#[test]
fn shaders_sharing_a_registry_agree_on_global_bits() {
    let globals = GlobalDefines::new();
    globals.reserve("FOG", 1).unwrap();

    let mut scene = Shader::new("scene", globals.clone());
    scene.reserve_define("INSTANCED", 1).unwrap();
    let sky = Shader::new("sky", globals.clone());

    globals.set("FOG", 1).unwrap();
    scene.set_define("INSTANCED", 1).unwrap();

    // Global bits occupy the same low positions in every shader's key; the
    // sky shader has no local slots so its key is the global contribution.
    assert_eq!(sky.compute_permutation(), 0b1);
    assert_eq!(scene.compute_permutation(), 0b11);

    globals.set("FOG", 0).unwrap();
    assert_eq!(sky.compute_permutation(), 0);
    assert_eq!(scene.compute_permutation(), 0b10);
}

#[test]
fn every_value_combination_yields_a_distinct_key() {
    let globals = GlobalDefines::new();
    globals.reserve("QUALITY", 2).unwrap();

    let mut shader = Shader::new("test", globals.clone());
    shader.reserve_define("DIFFUSE_MAP", 1).unwrap();
    shader.reserve_define("INSTANCED", 1).unwrap();

    let mut seen = std::collections::HashSet::new();
    for quality in 0..4 {
        for diffuse in 0..2 {
            for instanced in 0..2 {
                globals.set("QUALITY", quality).unwrap();
                shader.set_define("DIFFUSE_MAP", diffuse).unwrap();
                shader.set_define("INSTANCED", instanced).unwrap();
                assert!(seen.insert(shader.compute_permutation()));
            }
        }
    }
    assert_eq!(seen.len(), 4 * 2 * 2);
}

#[test]
fn misuse_is_reported_not_silently_accepted() {
    let globals = GlobalDefines::new();
    let mut shader = Shader::new("test", globals);
    shader.reserve_define("A", 2).unwrap();

    assert_eq!(
        shader.set_define("MISSING", 1),
        Err(ShaderError::UnknownDefine("MISSING".to_owned()))
    );
    assert!(matches!(
        shader.set_define("A", 4),
        Err(ShaderError::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        shader.reserve_define("HUGE", 31),
        Err(ShaderError::BitOverflow { .. })
    ));
}

#[test]
fn locked_set_refuses_new_slots_but_keeps_working() {
    let mut set = PermutationSet::new();
    set.reserve("A", 1).unwrap();
    set.lock();

    assert!(matches!(set.reserve("B", 1), Err(ShaderError::Locked(_))));
    set.set("A", 1).unwrap();
    assert_eq!(set.key_from(0), 1);
}

#[test]
fn preprocessed_wgsl_contains_exactly_the_active_branch() {
    let source = "\
@vertex
fn vs_main() {
#ifdef INSTANCED
    instanced_path();
#else
    single_path();
#endif
}
";
    let instanced = preprocess(source, &[("INSTANCED".to_owned(), 1)]);
    assert!(instanced.starts_with("const INSTANCED: u32 = 1u;\n"));
    assert!(instanced.contains("instanced_path();"));
    assert!(!instanced.contains("single_path();"));
    assert!(!instanced.contains('#'));

    let plain = preprocess(source, &[]);
    assert!(!plain.contains("const"));
    assert!(!plain.contains("instanced_path();"));
    assert!(plain.contains("single_path();"));
    assert!(!plain.contains('#'));
}

#[test]
fn demo_shader_sources_balance_their_directives() {
    for source in [
        include_str!("../src/shaders/generic.wgsl"),
        include_str!("../src/shaders/skybox.wgsl"),
    ] {
        let opens = source
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("#ifdef") || t.starts_with("#ifndef")
            })
            .count();
        let closes = source
            .lines()
            .filter(|l| l.trim_start().starts_with("#endif"))
            .count();
        assert_eq!(opens, closes);

        // Expansion with no symbols must leave no directive behind.
        let expanded = preprocess(source, &[]);
        assert!(expanded.lines().all(|l| !l.trim_start().starts_with('#')));
    }
}
