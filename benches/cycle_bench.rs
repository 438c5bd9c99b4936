use criterion::{Criterion, criterion_group, criterion_main};
use std::{hint::black_box, path::Path, time::Duration};

use neural_locomotion::{
    ACTION_SIZE, ControllerParams, NeuralController, PolicyParameters, latest_value_channel,
    hardware::{HardwareInterface, sim::SimulatedRobot},
    policy::{LOCOMOTION_TOPOLOGY, PolicyModel},
};

const PARAMS: &str = include_str!("../config/controller.toml");

fn active_controller(repeat_action: usize) -> (NeuralController, HardwareInterface, SimulatedRobot) {
    let file = ControllerParams::from_toml_str(PARAMS, Path::new("controller.toml")).unwrap();
    let mut params = PolicyParameters::from_params(&file).unwrap();
    params.init_duration = 0.0;
    params.fade_in_duration = 0.0;
    params.repeat_action = repeat_action;

    let mut hw = HardwareInterface::standard_layout(&params);
    let robot = SimulatedRobot::new(&params, &hw, [0.0; ACTION_SIZE]).unwrap();
    robot.publish(&mut hw.state);
    let model = PolicyModel::zeros(&LOCOMOTION_TOPOLOGY, params.observation_size());
    let (_publisher, reader) = latest_value_channel();
    let mut controller = NeuralController::from_parts(params, model, reader).unwrap();
    controller.activate(&hw, Duration::ZERO).unwrap();
    (controller, hw, robot)
}

fn cycle_bench(c: &mut Criterion) {
    let period = Duration::from_millis(2);

    for repeat in [1usize, 4] {
        let (mut controller, mut hw, mut robot) = active_controller(repeat);
        let mut now = Duration::ZERO;
        c.bench_function(&format!("control_cycle_repeat_{}", repeat), |b| {
            b.iter(|| {
                robot.publish(&mut hw.state);
                let report = controller.update(&mut hw, now, period);
                robot.step(&hw.command, period.as_secs_f64());
                now += period;
                let _ = black_box(report);
            })
        });
    }
}

criterion_group!(benches, cycle_bench);
criterion_main!(benches);
